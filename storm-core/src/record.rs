///
/// # Record Base
///
/// `Record` is what a persistable type implements: a table name and a
/// declaration step that lists its columns, key first. `Retrievable` is the
/// object-safe capability every `Record` gets for free; the mapper works on
/// `&dyn Retrievable` so batches may mix record types.
///
/// ## Registry lifetime
///
/// A type's `FieldRegistry` is built the first time any schema or value
/// operation touches an instance of that type, exactly once, and shared by all
/// instances afterwards. Descriptors address fields through projections, so a
/// cloned record reads and writes its own storage. The declaration step only
/// ever sees the registry, never a half-built record.
///
/// ## Example
///
/// ```rust
/// use storm_core::{FieldRegistry, Record, Result, Retrievable};
///
/// #[derive(Default)]
/// struct Host {
///     host_id: i64,
///     host_name: String,
///     price: f64,
/// }
///
/// impl Record for Host {
///     const TABLE: &'static str = "Hosts";
///
///     fn declare(fields: &mut FieldRegistry<Self>) -> Result<()> {
///         fields
///             .field("host_id", |h| &h.host_id, |h| &mut h.host_id)?
///             .field("host_name", |h| &h.host_name, |h| &mut h.host_name)?
///             .field("price", |h| &h.price, |h| &mut h.price)?;
///         Ok(())
///     }
/// }
///
/// let mut host = Host::default();
/// host.set_string_value("price", "99.9").unwrap();
/// assert_eq!(host.price, 99.9);
/// ```
///

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use crate::errors::{Result, StormError};
use crate::field::{FieldRegistry, Schema};
use crate::value::{FieldKind, Value};

pub trait Record: Default + Send + Sync + 'static {
    const TABLE: &'static str;

    /// Declares the columns of this type in storage order, key first.
    fn declare(fields: &mut FieldRegistry<Self>) -> Result<()>;
}

type SharedRegistry = Arc<dyn Any + Send + Sync>;

static REGISTRIES: LazyLock<RwLock<HashMap<TypeId, SharedRegistry>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

thread_local! {
    /// Types whose declaration step is running on this thread.
    static DECLARING: RefCell<Vec<TypeId>> = const { RefCell::new(Vec::new()) };
}

/// Returns the registry of `R`, building it on first use.
pub fn registry<R: Record>() -> Result<Arc<FieldRegistry<R>>> {
    let id = TypeId::of::<R>();

    {
        let registries = REGISTRIES.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(found) = registries.get(&id).and_then(downcast::<R>) {
            return Ok(found);
        }
    }

    // Declarations may consult other registries, so no lock is held here.
    let built = Arc::new(declare_once::<R>(id)?);

    let mut registries = REGISTRIES.write().unwrap_or_else(PoisonError::into_inner);
    let shared = registries.entry(id).or_insert(built.clone());
    Ok(downcast::<R>(shared).unwrap_or(built))
}

/// Builds the registry of `R`, refusing a declaration step that asks for
/// the registry of its own type.
fn declare_once<R: Record>(id: TypeId) -> Result<FieldRegistry<R>> {
    let reentered = DECLARING.with(|declaring| {
        let mut declaring = declaring.borrow_mut();
        if declaring.contains(&id) {
            return true;
        }
        declaring.push(id);
        false
    });
    if reentered {
        return Err(StormError::Registration {
            table: R::TABLE.to_string(),
            reason: "declaration step requires its own registry".to_string(),
        });
    }

    let built = FieldRegistry::<R>::build();
    DECLARING.with(|declaring| declaring.borrow_mut().retain(|t| *t != id));
    built
}

fn downcast<R: Record>(shared: &SharedRegistry) -> Option<Arc<FieldRegistry<R>>> {
    Arc::clone(shared).downcast::<FieldRegistry<R>>().ok()
}

pub trait Retrievable {
    fn table_name(&self) -> &'static str;

    fn schema(&self) -> Result<Arc<Schema>>;

    fn get_value(&self, name: &str) -> Result<Value>;

    /// All values in registration order.
    fn get_values(&self) -> Result<Vec<Value>>;

    fn get_string_value(&self, name: &str) -> Result<String>;

    fn set_value(&mut self, name: &str, raw: &[u8]) -> Result<()>;

    /// Replaces several fields at once. On error no field has changed.
    fn set_values(&mut self, raw: &[(&str, &[u8])]) -> Result<()>;

    fn set_string_value(&mut self, name: &str, text: &str) -> Result<()>;
}

impl<R: Record> Retrievable for R {
    fn table_name(&self) -> &'static str {
        R::TABLE
    }

    fn schema(&self) -> Result<Arc<Schema>> {
        Ok(registry::<R>()?.schema())
    }

    fn get_value(&self, name: &str) -> Result<Value> {
        Ok(registry::<R>()?.descriptor(name)?.read(self))
    }

    fn get_values(&self) -> Result<Vec<Value>> {
        Ok(registry::<R>()?.descriptors().map(|d| d.read(self)).collect())
    }

    fn get_string_value(&self, name: &str) -> Result<String> {
        Ok(self.get_value(name)?.to_string())
    }

    fn set_value(&mut self, name: &str, raw: &[u8]) -> Result<()> {
        registry::<R>()?.descriptor(name)?.write(self, raw)
    }

    fn set_values(&mut self, raw: &[(&str, &[u8])]) -> Result<()> {
        let registry = registry::<R>()?;
        let mut staged = R::default();
        for (name, bytes) in raw {
            registry.descriptor(name)?.write(&mut staged, bytes)?;
        }
        for (name, bytes) in raw {
            registry.descriptor(name)?.write(self, bytes)?;
        }
        Ok(())
    }

    fn set_string_value(&mut self, name: &str, text: &str) -> Result<()> {
        let registry = registry::<R>()?;
        let descriptor = registry.descriptor(name)?;
        let parse_error = || StormError::Parse {
            field: name.to_string(),
            kind: descriptor.kind,
            input: text.to_string(),
        };

        match descriptor.kind {
            FieldKind::Integer => {
                let parsed: i64 = text.parse().map_err(|_| parse_error())?;
                if !descriptor.holds(parsed) {
                    return Err(parse_error());
                }
                descriptor.write(self, &parsed.to_le_bytes())
            }
            FieldKind::Float => {
                let parsed: f64 = text.parse().map_err(|_| parse_error())?;
                descriptor.write(self, &parsed.to_le_bytes())
            }
            FieldKind::Text | FieldKind::Timestamp => descriptor.write(self, text.as_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::ffi::CString;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Host {
        host_id: i64,
        host_name: String,
        address: Option<CString>,
        asset: i32,
        price: f64,
    }

    impl Record for Host {
        const TABLE: &'static str = "Hosts";

        fn declare(fields: &mut FieldRegistry<Self>) -> Result<()> {
            fields
                .field("host_id", |h| &h.host_id, |h| &mut h.host_id)?
                .field("host_name", |h| &h.host_name, |h| &mut h.host_name)?
                .field("address", |h| &h.address, |h| &mut h.address)?
                .field("asset", |h| &h.asset, |h| &mut h.asset)?
                .field("price", |h| &h.price, |h| &mut h.price)?;
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct Service {
        service_id: i32,
        host_id: i64,
        start_date: NaiveDateTime,
    }

    impl Record for Service {
        const TABLE: &'static str = "Services";

        fn declare(fields: &mut FieldRegistry<Self>) -> Result<()> {
            fields
                .field("service_id", |s| &s.service_id, |s| &mut s.service_id)?
                .foreign::<Host, _>("host_id", |s| &s.host_id, |s| &mut s.host_id)?
                .field("start_date", |s| &s.start_date, |s| &mut s.start_date)?;
            Ok(())
        }
    }

    #[test]
    fn test_registry_is_shared_per_type() {
        let first = registry::<Host>().unwrap();
        let second = registry::<Host>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first.schema(), &Host::default().schema().unwrap()));
    }

    #[test]
    fn test_get_values_in_registration_order() {
        let host = Host {
            host_id: 3,
            host_name: "alpha".to_string(),
            address: Some(CString::new("10.0.0.3").unwrap()),
            asset: -7,
            price: 12.5,
        };

        let values = host.get_values().unwrap();
        let names: Vec<&str> = values.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["host_id", "host_name", "address", "asset", "price"]);
        assert_eq!(values[0].as_integer(), Some(3));
        assert_eq!(values[2].as_text(), Some("10.0.0.3"));
        assert_eq!(values[3].as_integer(), Some(-7));
        assert_eq!(values[4].as_float(), Some(12.5));
    }

    #[test]
    fn test_string_value_bridge() {
        let mut host = Host::default();

        host.set_string_value("price", "99.9").unwrap();
        assert_eq!(host.price, 99.9);
        assert_eq!(host.get_string_value("price").unwrap().parse::<f64>().unwrap(), 99.9);

        host.set_string_value("asset", "-42").unwrap();
        assert_eq!(host.asset, -42);
        assert_eq!(host.get_string_value("asset").unwrap(), "-42");

        host.set_string_value("address", "::1").unwrap();
        assert_eq!(host.get_string_value("address").unwrap(), "::1");

        host.set_string_value("host_name", "beta").unwrap();
        assert_eq!(host.host_name, "beta");
    }

    #[test]
    fn test_string_value_rejects_malformed_numbers() {
        let mut host = Host::default();

        let err = host.set_string_value("asset", "12abc").unwrap_err();
        assert!(matches!(err, StormError::Parse { kind: FieldKind::Integer, .. }));

        let err = host.set_string_value("price", "").unwrap_err();
        assert!(matches!(err, StormError::Parse { kind: FieldKind::Float, .. }));
        assert_eq!(host.price, 0.0);
    }

    #[test]
    fn test_unknown_field_is_not_found() {
        let mut host = Host::default();
        assert!(matches!(
            host.get_value("nope"),
            Err(StormError::FieldNotFound { .. })
        ));
        assert!(matches!(
            host.set_value("nope", b"x"),
            Err(StormError::FieldNotFound { .. })
        ));
    }

    #[test]
    fn test_clone_addresses_its_own_fields() {
        let mut original = Host {
            host_name: "original".to_string(),
            ..Host::default()
        };
        let mut copy = original.clone();

        copy.set_string_value("host_name", "copy").unwrap();
        original.set_value("asset", &5i64.to_le_bytes()).unwrap();

        assert_eq!(original.host_name, "original");
        assert_eq!(copy.host_name, "copy");
        assert_eq!(copy.asset, 0);
        assert_eq!(original.asset, 5);
    }

    #[test]
    fn test_timestamp_round_trip_through_strings() {
        let mut service = Service::default();
        service.set_string_value("start_date", "2019-12-31 23:59:58").unwrap();
        assert_eq!(
            service.start_date,
            NaiveDate::from_ymd_opt(2019, 12, 31).unwrap().and_hms_opt(23, 59, 58).unwrap()
        );
        assert_eq!(service.get_string_value("start_date").unwrap(), "2019-12-31 23:59:58");
        assert_eq!(service.schema().unwrap().column("host_id").unwrap().foreign_table, "Hosts");
        assert_eq!(service.table_name(), "Services");
    }

    #[derive(Debug, Default)]
    struct Gauge {
        gauge_id: i64,
        level: i8,
        count: u32,
    }

    impl Record for Gauge {
        const TABLE: &'static str = "Gauges";

        fn declare(fields: &mut FieldRegistry<Self>) -> Result<()> {
            fields
                .field("gauge_id", |g| &g.gauge_id, |g| &mut g.gauge_id)?
                .field("level", |g| &g.level, |g| &mut g.level)?
                .field("count", |g| &g.count, |g| &mut g.count)?;
            Ok(())
        }
    }

    #[test]
    fn test_string_value_rejects_out_of_range_integers() {
        let mut gauge = Gauge {
            level: 5,
            count: 9,
            ..Gauge::default()
        };

        let err = gauge.set_string_value("level", "300").unwrap_err();
        assert!(matches!(err, StormError::Parse { kind: FieldKind::Integer, .. }));
        assert_eq!(gauge.level, 5);

        let err = gauge.set_string_value("count", "-1").unwrap_err();
        assert!(matches!(err, StormError::Parse { kind: FieldKind::Integer, .. }));
        assert_eq!(gauge.count, 9);

        gauge.set_string_value("level", "-128").unwrap();
        gauge.set_string_value("count", "4294967295").unwrap();
        assert_eq!(gauge.level, i8::MIN);
        assert_eq!(gauge.count, u32::MAX);
        assert_eq!(gauge.get_string_value("count").unwrap(), "4294967295");
    }

    #[test]
    fn test_set_values_changes_nothing_on_error() {
        let mut service = Service {
            service_id: 4,
            ..Service::default()
        };
        let host_id = 8i64.to_le_bytes();

        let err = service
            .set_values(&[("host_id", host_id.as_slice()), ("start_date", b"".as_slice())])
            .unwrap_err();
        assert!(matches!(err, StormError::Parse { kind: FieldKind::Timestamp, .. }));
        assert_eq!(service.host_id, 0);
        assert_eq!(service.service_id, 4);

        service
            .set_values(&[
                ("host_id", host_id.as_slice()),
                ("start_date", b"2020-01-02 03:04:05".as_slice()),
            ])
            .unwrap();
        assert_eq!(service.host_id, 8);
        assert_eq!(service.get_string_value("start_date").unwrap(), "2020-01-02 03:04:05");
    }

    #[derive(Default)]
    struct Anchor {
        anchor_id: i64,
        label: String,
    }

    impl Record for Anchor {
        const TABLE: &'static str = "Anchors";

        fn declare(fields: &mut FieldRegistry<Self>) -> Result<()> {
            fields
                .field("anchor_id", |a| &a.anchor_id, |a| &mut a.anchor_id)?
                .field("label", |a| &a.label, |a| &mut a.label)?;
            Ok(())
        }
    }

    /// Names its foreign key after the parent's key column.
    #[derive(Default)]
    struct Mooring {
        mooring_id: i64,
        anchor: i64,
    }

    impl Record for Mooring {
        const TABLE: &'static str = "Moorings";

        fn declare(fields: &mut FieldRegistry<Self>) -> Result<()> {
            let parent_key = Anchor::default().schema()?.key().name.clone();
            fields
                .field("mooring_id", |m| &m.mooring_id, |m| &mut m.mooring_id)?
                .foreign::<Anchor, _>(&parent_key, |m| &m.anchor, |m| &mut m.anchor)?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Looped {
        looped_id: i64,
        note: String,
    }

    impl Record for Looped {
        const TABLE: &'static str = "Loops";

        fn declare(fields: &mut FieldRegistry<Self>) -> Result<()> {
            Looped::default().schema()?;
            fields
                .field("looped_id", |l| &l.looped_id, |l| &mut l.looped_id)?
                .field("note", |l| &l.note, |l| &mut l.note)?;
            Ok(())
        }
    }

    #[test]
    fn test_declaration_may_consult_other_registries() {
        let schema = Mooring::default().schema().unwrap();
        let names: Vec<&str> = schema.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["mooring_id", "anchor_id"]);
        assert_eq!(schema.foreign_key_to("Anchors").unwrap().name, "anchor_id");
        assert!(Arc::ptr_eq(
            &registry::<Anchor>().unwrap().schema(),
            &Anchor::default().schema().unwrap()
        ));
    }

    #[test]
    fn test_declaration_requiring_itself_is_rejected() {
        for _ in 0..2 {
            match Looped::default().schema() {
                Err(StormError::Registration { table, reason }) => {
                    assert_eq!(table, "Loops");
                    assert!(reason.contains("its own registry"));
                }
                other => panic!("Expected Registration error, got {:?}", other),
            }
        }
        assert_eq!(registry::<Host>().unwrap().len(), 5);
    }
}
