pub mod app_config;
pub mod database;
pub mod queue_scheduler;
pub mod services;

// Re-export main types for easier imports
pub use app_config::{AppConfig, LoggingConfig};
pub use database::DatabaseConfig;
pub use queue_scheduler::{QueueConfig, SchedulerConfig};
pub use services::{
    ConfigurationConfig, ExecutorKind, LimitRule, OptionConfig, OutputConfig, ServiceConfig,
};
