//! 配置管理
//!
//! 进程启动时从 TOML 文件与环境变量构建一次 [`AppConfig`]，
//! 之后通过 `Arc` 显式传递给任务队列、调度器和执行器，不存在全局配置对象。
//!
//! 加载顺序：
//! 1. 结构默认值
//! 2. 配置文件（TOML）
//! 3. 环境变量覆盖（前缀 `BIOQUEUE`，层级分隔符 `__`）

pub mod models;

pub use models::*;
