pub mod entities;
pub mod repositories;
pub mod value_objects;

pub use bioqueue_core::{SchedulerError, SchedulerResult};
pub use entities::*;
pub use repositories::*;
pub use value_objects::*;
