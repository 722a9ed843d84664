use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    database::DatabaseConfig,
    queue_scheduler::{QueueConfig, SchedulerConfig},
    services::ServiceConfig,
};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" or "pretty"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(anyhow::anyhow!("无效的日志级别: {}", self.level));
        }

        if self.format != "json" && self.format != "pretty" {
            return Err(anyhow::anyhow!("不支持的日志格式: {}", self.format));
        }

        Ok(())
    }
}

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
    pub services: Vec<ServiceConfig>,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: BIOQUEUE_, nested keys joined by `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/bioqueue.toml", "bioqueue.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("BIOQUEUE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.queue.validate().context("任务队列配置验证失败")?;
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;

        let mut names = HashSet::new();
        for service in &self.services {
            service
                .validate()
                .with_context(|| format!("服务配置验证失败: {}", service.name))?;
            if !names.insert(service.name.as_str()) {
                return Err(anyhow::anyhow!("服务名称重复: {}", service.name));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorKind;
    use std::io::Write;

    const SAMPLE: &str = r#"
[queue]
port = 4000
num_workers = 2

[[services]]
name = "echo"

[[services.options]]
name = "alpha"
param = "-a=${value}"

[[services.outputs]]
pattern = ".*\\.txt"

[[services.configurations]]
name = "local"
executor = "shell"
bin = "echo"

[[services.configurations]]
name = "grid"
executor = "grid_engine"
bin = "echo"
queue_args = ["-q", "long"]

[[services.configurations.limits]]
option = "alpha"
max_length = 10
"#;

    #[test]
    fn test_from_toml_with_defaults() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.queue.port, 4000);
        assert_eq!(config.queue.num_workers, 2);
        assert_eq!(config.queue.io_timeout_seconds, 5);
        assert_eq!(config.scheduler.poll_interval_seconds, 5);
        assert_eq!(config.services.len(), 1);

        let service = &config.services[0];
        assert_eq!(service.configurations[0].executor, ExecutorKind::Shell);
        assert_eq!(service.configurations[1].executor, ExecutorKind::GridEngine);
        assert_eq!(service.configurations[1].limits[0].max_length, Some(10));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.services[0].name, "echo");
    }

    #[test]
    fn test_missing_file_is_rejected() {
        assert!(AppConfig::load(Some("/nonexistent/bioqueue.toml")).is_err());
    }

    #[test]
    fn test_duplicate_configuration_rejected() {
        let toml = r#"
[[services]]
name = "echo"

[[services.configurations]]
name = "local"
executor = "shell"
bin = "echo"

[[services.configurations]]
name = "local"
executor = "queue"
bin = "echo"
"#;
        assert!(AppConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_output_must_bind_known_option() {
        let toml = r#"
[[services]]
name = "echo"

[[services.outputs]]
option = "missing"
path = "out.txt"

[[services.configurations]]
name = "local"
executor = "shell"
bin = "echo"
"#;
        assert!(AppConfig::from_toml(toml).is_err());
    }
}
