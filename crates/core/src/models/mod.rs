//! # 数据模型
//!
//! 作业执行层共享的核心数据结构。
//!
//! ### JobStatus - 作业状态
//! 运行时作业句柄、任务队列协议和持久化作业记录共用的状态枚举，
//! 状态只能沿 `queued → running → {completed | failed}` 前进。
//!
//! ### ProcessOutput - 进程输出
//! 作业完成后的返回码、标准输出、标准错误以及收集到的输出文件路径，
//! 同时也是任务队列 `JOB RES ` 响应的载荷格式。

pub mod job_status;
pub mod process_output;

pub use job_status::JobStatus;
pub use process_output::ProcessOutput;
