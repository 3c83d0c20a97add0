///
/// # Value Container
///
/// A `Value` is a transient, type-erased snapshot of one field of one record,
/// captured for transport to or from the store. It carries the column name,
/// its `FieldKind`, the field's encoded width and a byte buffer.
///
/// ## Storage
///
/// The buffer is a `SmallVec` with `INLINE_CAPACITY` bytes of inline storage.
/// Integers, floats and timestamps always fit inline; text longer than the
/// inline capacity spills to a single heap allocation owned by the value and
/// released when the value is dropped. There is no implicit copy: `Clone` is an
/// explicit deep copy and `std::mem::take` leaves an empty value behind.
///
/// ## Encodings
///
/// - Integer: canonical signed 8-byte little-endian. Narrower signed fields are
///   sign-extended, unsigned fields are zero-extended.
/// - Float: 8-byte IEEE-754 double, little-endian bit pattern.
/// - Text: UTF-8 bytes without a terminator.
/// - Timestamp: `YYYY-MM-DD HH:MM:SS` text.
///

use std::ffi::CStr;
use std::fmt;

use chrono::NaiveDateTime;
use smallvec::SmallVec;

pub const INLINE_CAPACITY: usize = 240;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The closed set of column kinds a record field can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Integer,
    Float,
    Text,
    Timestamp,
}

impl FieldKind {
    /// Column type used in table definitions and compared during reconciliation.
    pub fn sql_type(self) -> &'static str {
        match self {
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Text | FieldKind::Timestamp => "text",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Text => "text",
            FieldKind::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// Borrowed view of a field's current content, handed out by a `ColumnType`.
#[derive(Debug, Clone, Copy)]
pub enum FieldContent<'a> {
    /// Native little-endian bytes; only `bytes[..width]` is meaningful.
    Integer {
        bytes: [u8; 8],
        width: usize,
        signed: bool,
    },
    Float(f64),
    Text(&'a str),
    CText(Option<&'a CStr>),
    Timestamp(&'a NaiveDateTime),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Value {
    pub name: String,
    pub kind: Option<FieldKind>,
    pub size: usize,
    buffer: SmallVec<[u8; INLINE_CAPACITY]>,
}

impl Value {
    /// Captures `content` for the column `name`.
    pub fn encode(name: &str, kind: FieldKind, size: usize, content: FieldContent<'_>) -> Self {
        let mut buffer = SmallVec::new();
        match content {
            FieldContent::Integer { bytes, width, signed } => {
                buffer.extend_from_slice(&sign_extend(bytes, width, signed));
            }
            FieldContent::Float(f) => buffer.extend_from_slice(&f.to_le_bytes()),
            FieldContent::Text(s) => buffer.extend_from_slice(s.as_bytes()),
            FieldContent::CText(Some(c)) => buffer.extend_from_slice(c.to_bytes()),
            FieldContent::CText(None) => {}
            FieldContent::Timestamp(ts) => {
                let rendered = ts.format(TIMESTAMP_FORMAT).to_string();
                buffer.extend_from_slice(rendered.as_bytes());
            }
        }

        Self {
            name: name.to_string(),
            kind: Some(kind),
            size,
            buffer,
        }
    }

    pub fn integer(name: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            kind: Some(FieldKind::Integer),
            size: 8,
            buffer: SmallVec::from_slice(&value.to_le_bytes()),
        }
    }

    pub fn float(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            kind: Some(FieldKind::Float),
            size: 8,
            buffer: SmallVec::from_slice(&value.to_le_bytes()),
        }
    }

    pub fn text(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: Some(FieldKind::Text),
            size: 0,
            buffer: SmallVec::from_slice(value.as_bytes()),
        }
    }

    /// Returns `true` for a value left behind by `std::mem::take`.
    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
    }

    /// `false` once the buffer has spilled to the heap.
    pub fn is_inline(&self) -> bool {
        !self.buffer.spilled()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.kind {
            Some(FieldKind::Integer) => self.buffer.as_slice().try_into().ok().map(i64::from_le_bytes),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.kind {
            Some(FieldKind::Float) => self.buffer.as_slice().try_into().ok().map(f64::from_le_bytes),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self.kind {
            Some(FieldKind::Text | FieldKind::Timestamp) => std::str::from_utf8(&self.buffer).ok(),
            _ => None,
        }
    }

    /// True when this is an integer key equal to zero, i.e. one the store should assign.
    pub fn is_zero_key(&self) -> bool {
        self.as_integer() == Some(0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Some(FieldKind::Integer) => write!(f, "{}", self.as_integer().unwrap_or_default()),
            Some(FieldKind::Float) => write!(f, "{}", self.as_float().unwrap_or_default()),
            Some(FieldKind::Text | FieldKind::Timestamp) => {
                f.write_str(&String::from_utf8_lossy(&self.buffer))
            }
            None => Ok(()),
        }
    }
}

/// Widens `width` little-endian bytes to the canonical 8-byte form.
///
/// The byte order is fixed to little-endian; the sign bit is the top bit of
/// `bytes[width - 1]`.
pub fn sign_extend(bytes: [u8; 8], width: usize, signed: bool) -> [u8; 8] {
    let width = width.clamp(1, 8);
    let negative = signed && bytes[width - 1] & 0x80 != 0;
    let mut out = if negative { [0xFF; 8] } else { [0; 8] };
    out[..width].copy_from_slice(&bytes[..width]);
    out
}
