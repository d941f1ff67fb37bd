pub mod error;
pub mod models;
mod registry;
pub mod ttl;

pub use error::RegistryError;
pub use models::{Statistics, Task, TaskStatus};
pub use registry::{InMemoryTaskRegistry, StatusUpdateFields, TaskRegistry};
pub use ttl::TtlConfig;
