use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 任务队列服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub host: String,
    pub port: u16,
    pub num_workers: usize,
    /// 单个连接的读写超时
    pub io_timeout_seconds: u64,
    /// accept 等待上限，用于在两次 accept 之间检查关闭标志
    pub accept_timeout_seconds: u64,
    /// 未指定工作目录的作业在此目录下创建独立子目录
    pub work_dir: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3397,
            num_workers: 4,
            io_timeout_seconds: 5,
            accept_timeout_seconds: 5,
            work_dir: PathBuf::from("work"),
        }
    }
}

impl QueueConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_seconds)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs(self.accept_timeout_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("任务队列主机地址不能为空"));
        }

        if self.num_workers == 0 {
            return Err(anyhow::anyhow!("Worker线程数必须大于0"));
        }

        if self.io_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("连接超时时间必须大于0"));
        }

        if self.accept_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("accept超时时间必须大于0"));
        }

        Ok(())
    }
}

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_seconds: u64,
    pub collect_interval_seconds: u64,
    /// 每个提交的作业在此目录下获得一个独立的工作目录
    pub work_dir: PathBuf,
    /// `queue` 类型执行器连接的任务队列地址
    pub queue_host: String,
    pub queue_port: u16,
    pub queue_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 5,
            collect_interval_seconds: 5,
            work_dir: PathBuf::from("jobs"),
            queue_host: "127.0.0.1".to_string(),
            queue_port: 3397,
            queue_timeout_seconds: 5,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval_seconds)
    }

    pub fn queue_address(&self) -> String {
        format!("{}:{}", self.queue_host, self.queue_port)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.collect_interval_seconds == 0 {
            return Err(anyhow::anyhow!("收集间隔必须大于0"));
        }

        if self.queue_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("任务队列超时时间必须大于0"));
        }

        Ok(())
    }
}
