///
/// # storm — A minimal object-relational mapper for SQLite
///
/// Records declare their columns once; the `Mapper` persists them without
/// hand-written SQL.
///
/// - config: `MapperConfig`, loadable from `storm.toml`
/// - store: the SQLite connection, statement and row protocol
/// - sql: statement synthesis and the per-mapper statement cache
/// - mapper: CRUD, batch transactions and child lookups
/// - reconcile: live table layout checks (feature `reconcile`, on by default)
///
/// ## Example
///
/// ```rust,no_run
/// use storm::{FieldRegistry, Mapper, Record, Result};
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
/// fn main() -> Result<()> {
///     let mut mapper = Mapper::new("inventory.db");
///
///     let mut host = Host {
///         host_name: "alpha".to_string(),
///         price: 12.5,
///         ..Host::default()
///     };
///     mapper.save(&mut host)?;
///     assert!(host.host_id > 0);
///
///     let cheap: Vec<Host> = mapper.retrieve_many("price < 20")?;
///     assert!(!cheap.is_empty());
///     Ok(())
/// }
/// ```
///

pub mod config;
pub mod mapper;
#[cfg(feature = "reconcile")]
pub mod reconcile;
pub mod sql;
pub mod store;

pub use config::{DatabaseConfig, MapperConfig};
pub use mapper::Mapper;
pub use storm_core::{
    ColumnSchema, ColumnType, FieldKind, FieldRegistry, Record, Result, Retrievable, Schema,
    StormError, Value, registry, to_json, to_json_string,
};
