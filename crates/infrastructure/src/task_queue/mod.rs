//! 任务队列线路协议与客户端
//!
//! 每条消息以 8 字节、空格填充的 ASCII 命令或状态码开头；
//! 载荷为 8 字节大端长度前缀加上对应长度的 UTF-8 JSON 文档。

pub mod client;
pub mod protocol;

pub use client::{DeferredResult, QueueClient, SubmitRequest};
pub use protocol::{Command, ProtocolError, Status};
