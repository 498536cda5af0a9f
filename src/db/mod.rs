pub mod derive;
pub mod namespace;
pub mod operations;
pub mod registry;

pub use namespace::{Namespace, TableName};
pub use operations::{BatchSink, NamespaceSink, SchemaWriter};
pub use registry::{PgTenantRegistry, TenantRegistry};
