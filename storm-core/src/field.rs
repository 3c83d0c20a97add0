///
/// # Field Registry
///
/// Every record type declares its columns once, in order, into a
/// `FieldRegistry`. Each declaration produces a `FieldDescriptor` holding the
/// column name, its `FieldKind`, the encoded width of the backing Rust type,
/// the referenced table for foreign keys and a location: a pair of field
/// projections that reach the backing field inside any instance of the type.
///
/// Registration order is the storage order used everywhere else (SQL column
/// order, schema order). The first descriptor is the primary key, or for
/// one-to-one relations the foreign key standing in its place.
///
/// ## Supported field types
///
/// | Rust type             | Kind      | Width |
/// |-----------------------|-----------|-------|
/// | `i8 i16 i32 i64`      | Integer   | 1-8   |
/// | `u8 u16 u32`          | Integer   | 1-4   |
/// | `f64`                 | Float     | 8     |
/// | `String`              | Text      | 0     |
/// | `Option<CString>`     | Text      | 1     |
/// | `NaiveDateTime`       | Timestamp | 0     |
///

use std::ffi::CString;
use std::sync::Arc;

use chrono::NaiveDateTime;
use indexmap::IndexMap;

use crate::errors::{Result, StormError};
use crate::record::Record;
use crate::value::{FieldContent, FieldKind, TIMESTAMP_FORMAT, Value};

/// A Rust type that can back a column.
pub trait ColumnType {
    const KIND: FieldKind;
    /// Byte width for fixed-size kinds, `0` for owned text and timestamps.
    const SIZE: usize;
    /// Inclusive range of integer kinds, widened to `i64`.
    const BOUNDS: Option<(i64, i64)> = None;

    fn content(&self) -> FieldContent<'_>;

    /// Replaces the current content from its raw encoded form.
    fn apply(&mut self, field: &str, raw: &[u8]) -> Result<()>;
}

macro_rules! impl_integer_column {
    ($($ty:ty => $signed:expr),* $(,)?) => {
        $(
            impl ColumnType for $ty {
                const KIND: FieldKind = FieldKind::Integer;
                const SIZE: usize = std::mem::size_of::<$ty>();
                const BOUNDS: Option<(i64, i64)> = Some((<$ty>::MIN as i64, <$ty>::MAX as i64));

                fn content(&self) -> FieldContent<'_> {
                    let mut bytes = [0u8; 8];
                    bytes[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                    FieldContent::Integer {
                        bytes,
                        width: Self::SIZE,
                        signed: $signed,
                    }
                }

                fn apply(&mut self, field: &str, raw: &[u8]) -> Result<()> {
                    if raw.len() != 8 && raw.len() != Self::SIZE {
                        return Err(parse_error(field, Self::KIND, raw));
                    }
                    let mut native = [0u8; std::mem::size_of::<$ty>()];
                    native.copy_from_slice(&raw[..Self::SIZE]);
                    *self = <$ty>::from_le_bytes(native);
                    Ok(())
                }
            }
        )*
    };
}

impl_integer_column! {
    i8 => true,
    i16 => true,
    i32 => true,
    i64 => true,
    u8 => false,
    u16 => false,
    u32 => false,
}

impl ColumnType for f64 {
    const KIND: FieldKind = FieldKind::Float;
    const SIZE: usize = 8;

    fn content(&self) -> FieldContent<'_> {
        FieldContent::Float(*self)
    }

    fn apply(&mut self, field: &str, raw: &[u8]) -> Result<()> {
        let bytes: [u8; 8] = raw
            .try_into()
            .map_err(|_| parse_error(field, Self::KIND, raw))?;
        *self = f64::from_le_bytes(bytes);
        Ok(())
    }
}

impl ColumnType for String {
    const KIND: FieldKind = FieldKind::Text;
    const SIZE: usize = 0;

    fn content(&self) -> FieldContent<'_> {
        FieldContent::Text(self)
    }

    fn apply(&mut self, field: &str, raw: &[u8]) -> Result<()> {
        let text = text_from_raw(field, Self::KIND, raw)?;
        self.clear();
        self.push_str(text);
        Ok(())
    }
}

impl ColumnType for Option<CString> {
    const KIND: FieldKind = FieldKind::Text;
    const SIZE: usize = 1;

    fn content(&self) -> FieldContent<'_> {
        FieldContent::CText(self.as_deref())
    }

    fn apply(&mut self, field: &str, raw: &[u8]) -> Result<()> {
        let text = text_from_raw(field, Self::KIND, raw)?;
        let owned = CString::new(text).map_err(|_| parse_error(field, Self::KIND, raw))?;
        *self = Some(owned);
        Ok(())
    }
}

impl ColumnType for NaiveDateTime {
    const KIND: FieldKind = FieldKind::Timestamp;
    const SIZE: usize = 0;

    fn content(&self) -> FieldContent<'_> {
        FieldContent::Timestamp(self)
    }

    fn apply(&mut self, field: &str, raw: &[u8]) -> Result<()> {
        let text = text_from_raw(field, Self::KIND, raw)?;
        *self = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
            .map_err(|_| parse_error(field, Self::KIND, raw))?;
        Ok(())
    }
}

/// Text up to the first nul, which terminates C-style input.
fn text_from_raw<'a>(field: &str, kind: FieldKind, raw: &'a [u8]) -> Result<&'a str> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end]).map_err(|_| parse_error(field, kind, raw))
}

fn parse_error(field: &str, kind: FieldKind, raw: &[u8]) -> StormError {
    StormError::Parse {
        field: field.to_string(),
        kind,
        input: String::from_utf8_lossy(raw).into_owned(),
    }
}

trait Location<R>: Send + Sync {
    fn read<'a>(&self, record: &'a R) -> FieldContent<'a>;
    fn write(&self, record: &mut R, field: &str, raw: &[u8]) -> Result<()>;
}

struct Projection<R, T> {
    get: fn(&R) -> &T,
    get_mut: fn(&mut R) -> &mut T,
}

impl<R, T: ColumnType + 'static> Location<R> for Projection<R, T> {
    fn read<'a>(&self, record: &'a R) -> FieldContent<'a> {
        (self.get)(record).content()
    }

    fn write(&self, record: &mut R, field: &str, raw: &[u8]) -> Result<()> {
        (self.get_mut)(record).apply(field, raw)
    }
}

pub struct FieldDescriptor<R> {
    pub name: String,
    pub kind: FieldKind,
    pub size: usize,
    pub foreign_table: String,
    bounds: Option<(i64, i64)>,
    location: Box<dyn Location<R>>,
}

impl<R> FieldDescriptor<R> {
    /// Snapshots this field of `record`.
    pub fn read(&self, record: &R) -> Value {
        Value::encode(&self.name, self.kind, self.size, self.location.read(record))
    }

    pub fn write(&self, record: &mut R, raw: &[u8]) -> Result<()> {
        self.location.write(record, &self.name, raw)
    }

    /// Whether `value` fits the backing integer type without truncation.
    pub fn holds(&self, value: i64) -> bool {
        self.bounds.is_none_or(|(min, max)| (min..=max).contains(&value))
    }
}

impl<R> std::fmt::Debug for FieldDescriptor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("foreign_table", &self.foreign_table)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub kind: FieldKind,
    pub size: usize,
    pub foreign_table: String,
}

impl ColumnSchema {
    pub fn is_foreign(&self) -> bool {
        !self.foreign_table.is_empty()
    }
}

/// Ordered column list of one record type. Holds at least two columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    table: &'static str,
    columns: Vec<ColumnSchema>,
}

impl Schema {
    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    /// The zeroth column: primary key, or the foreign key in its place.
    pub fn key(&self) -> &ColumnSchema {
        &self.columns[0]
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// First column referencing `table`, if any.
    pub fn foreign_key_to(&self, table: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.foreign_table == table)
    }
}

pub struct FieldRegistry<R> {
    table: &'static str,
    fields: IndexMap<String, FieldDescriptor<R>>,
    schema: Arc<Schema>,
}

impl<R: Record> FieldRegistry<R> {
    /// Runs the declaration step of `R` and seals the result.
    pub fn build() -> Result<Self> {
        let mut registry = Self {
            table: R::TABLE,
            fields: IndexMap::new(),
            schema: Arc::new(Schema {
                table: R::TABLE,
                columns: Vec::new(),
            }),
        };
        R::declare(&mut registry)?;
        registry.seal()?;
        Ok(registry)
    }

    /// Declares a foreign key column referencing the table of `P`.
    pub fn foreign<P: Record, T: ColumnType + 'static>(
        &mut self,
        name: &str,
        get: fn(&R) -> &T,
        get_mut: fn(&mut R) -> &mut T,
    ) -> Result<&mut Self> {
        self.register(name, get, get_mut, P::TABLE)
    }
}

impl<R: 'static> FieldRegistry<R> {
    pub fn field<T: ColumnType + 'static>(
        &mut self,
        name: &str,
        get: fn(&R) -> &T,
        get_mut: fn(&mut R) -> &mut T,
    ) -> Result<&mut Self> {
        self.register(name, get, get_mut, "")
    }

    pub fn register<T: ColumnType + 'static>(
        &mut self,
        name: &str,
        get: fn(&R) -> &T,
        get_mut: fn(&mut R) -> &mut T,
        foreign_table: &str,
    ) -> Result<&mut Self> {
        if self.fields.contains_key(name) {
            return Err(StormError::Registration {
                table: self.table.to_string(),
                reason: format!("field '{}' is registered twice", name),
            });
        }

        let descriptor = FieldDescriptor {
            name: name.to_string(),
            kind: T::KIND,
            size: T::SIZE,
            foreign_table: foreign_table.to_string(),
            bounds: T::BOUNDS,
            location: Box::new(Projection { get, get_mut }),
        };
        self.fields.insert(name.to_string(), descriptor);
        Ok(self)
    }
}

impl<R> FieldRegistry<R> {
    fn seal(&mut self) -> Result<()> {
        if self.fields.len() < 2 {
            return Err(StormError::Registration {
                table: self.table.to_string(),
                reason: format!(
                    "a key and at least one more column are required, {} declared",
                    self.fields.len()
                ),
            });
        }

        let columns = self
            .fields
            .values()
            .map(|d| ColumnSchema {
                name: d.name.clone(),
                kind: d.kind,
                size: d.size,
                foreign_table: d.foreign_table.clone(),
            })
            .collect();
        self.schema = Arc::new(Schema {
            table: self.table,
            columns,
        });
        Ok(())
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    pub fn descriptor(&self, name: &str) -> Result<&FieldDescriptor<R>> {
        self.fields.get(name).ok_or_else(|| StormError::FieldNotFound {
            table: self.table.to_string(),
            field: name.to_string(),
        })
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &FieldDescriptor<R>> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
