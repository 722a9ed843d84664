//! 作业调度核心
//!
//! - [`executors`]：执行器抽象以及 shell、任务队列、Grid Engine、集群四种后端
//! - [`job`]：调度器内存中的作业句柄
//! - [`limits`]：按限制规则选择执行配置
//! - [`scheduler`]：提交循环与收集循环
//! - [`recovery`]：启动时重建在途作业

pub mod executors;
pub mod job;
pub mod limits;
pub mod recovery;
pub mod registry;
pub mod scheduler;

pub use executors::{create_executor, BackendRef, Executor};
pub use job::Job;
pub use limits::{ConfigurationSelector, FirstMatchSelector};
pub use recovery::RecoveryReport;
pub use registry::ExecutorRegistry;
pub use scheduler::{PassSummary, Scheduler, SchedulerHandle};
