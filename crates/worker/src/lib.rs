//! 任务队列服务
//!
//! 通过 TCP 接收作业，由固定数量的工作线程在本机执行，
//! 并按作业ID响应状态与结果查询。

pub mod command;
pub mod job;
pub mod pool;
pub mod registry;
pub mod server;
pub mod task_queue;

pub use command::{CommandFactory, LocalCommand};
pub use job::{FinishedNotifier, QueueJob, Runnable};
pub use pool::{DrainReport, WorkerPool};
pub use registry::JobRegistry;
pub use server::ServeError;
pub use task_queue::TaskQueue;
