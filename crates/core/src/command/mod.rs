//! 命令行构建
//!
//! 服务描述在配置加载时被解析成数据驱动的 [`ServiceDescriptor`]，
//! 所有执行后端共享同一份描述：选项模板渲染、输出文件声明与环境变量插值都在这里完成。

pub mod option;
pub mod output;
pub mod service;
pub mod template;

pub use option::{render_arguments, CommandOption};
pub use output::OutputDeclaration;
pub use service::{Configuration, ServiceCatalog, ServiceDescriptor};
pub use template::{expand_env, render_template};
