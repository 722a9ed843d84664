pub mod database;
pub mod task_queue;

pub use database::*;
pub use task_queue::*;
