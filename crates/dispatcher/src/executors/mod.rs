//! 执行后端
//!
//! 所有后端共用同一个服务描述，只在提交、状态轮询和结果获取的方式上不同：
//!
//! - [`ShellExecutor`]：调度器进程内直接启动子进程
//! - [`QueuedExecutor`]：经线路协议提交到任务队列服务
//! - [`GridEngineExecutor`]：通过 qsub/qstat 提交到 Grid Engine
//! - [`ClusterExecutor`]：预留扩展点
//!
//! 后端引用对后端以外的组件不透明，只能交回创建它的执行器解释。

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bioqueue_core::{
    Configuration, ExecutorKind, JobStatus, ProcessOutput, QueueError, SchedulerConfig,
    ServiceDescriptor,
};

pub mod cluster;
pub mod grid_engine;
pub mod queued;
pub mod shell;

pub use cluster::ClusterExecutor;
pub use grid_engine::GridEngineExecutor;
pub use queued::QueuedExecutor;
pub use shell::ShellExecutor;

/// 执行器返回的后端作业引用
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendRef(String);

impl BackendRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BackendRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// 执行器接口，每个实例绑定一个服务的一个执行配置
#[async_trait]
pub trait Executor: Send + Sync {
    fn service(&self) -> &Arc<ServiceDescriptor>;

    fn configuration(&self) -> &Configuration;

    fn kind(&self) -> ExecutorKind {
        self.configuration().executor
    }

    /// 在工作目录中提交作业，返回后端引用
    async fn submit(
        &self,
        values: &HashMap<String, String>,
        cwd: &Path,
    ) -> Result<BackendRef, QueueError>;

    async fn poll_status(&self, backend_ref: &BackendRef, cwd: &Path)
        -> Result<JobStatus, QueueError>;

    /// 获取已结束作业的输出，调用方应先轮询到终态
    async fn fetch_result(
        &self,
        backend_ref: &BackendRef,
        cwd: &Path,
    ) -> Result<ProcessOutput, QueueError>;
}

/// 根据执行配置的后端类型创建执行器
pub fn create_executor(
    service: Arc<ServiceDescriptor>,
    configuration: Configuration,
    config: &SchedulerConfig,
) -> Arc<dyn Executor> {
    match configuration.executor {
        ExecutorKind::Shell => Arc::new(ShellExecutor::new(service, configuration)),
        ExecutorKind::Queue => Arc::new(QueuedExecutor::new(
            service,
            configuration,
            bioqueue_infrastructure::QueueClient::new(
                config.queue_address(),
                config.queue_timeout(),
            ),
        )),
        ExecutorKind::GridEngine => Arc::new(GridEngineExecutor::new(service, configuration)),
        ExecutorKind::Cluster => Arc::new(ClusterExecutor::new(service, configuration)),
    }
}

/// 构建命令行；选项无法渲染说明请求本身有问题，不会因重试而改变
pub(crate) fn build_command(
    service: &ServiceDescriptor,
    configuration: &Configuration,
    values: &HashMap<String, String>,
) -> Result<Vec<String>, QueueError> {
    service
        .build_command(configuration, values)
        .map_err(|e| QueueError::Broken(e.to_string()))
}
