pub mod command;
pub mod config;
pub mod errors;
pub mod models;
pub mod shutdown;

pub use command::{Configuration, ServiceCatalog, ServiceDescriptor};
pub use config::*;
pub use errors::*;
pub use models::{JobStatus, ProcessOutput};
pub use shutdown::ShutdownManager;

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
