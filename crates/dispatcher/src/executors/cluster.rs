use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bioqueue_core::{Configuration, JobStatus, ProcessOutput, QueueError, ServiceDescriptor};

use super::{BackendRef, Executor};

/// 集群执行器占位实现，所有操作都返回不可恢复错误
pub struct ClusterExecutor {
    service: Arc<ServiceDescriptor>,
    configuration: Configuration,
}

impl ClusterExecutor {
    pub fn new(service: Arc<ServiceDescriptor>, configuration: Configuration) -> Self {
        Self {
            service,
            configuration,
        }
    }

    fn unsupported(&self) -> QueueError {
        QueueError::Broken(format!(
            "执行配置 {} 使用的集群后端尚未实现",
            self.configuration.name
        ))
    }
}

#[async_trait]
impl Executor for ClusterExecutor {
    fn service(&self) -> &Arc<ServiceDescriptor> {
        &self.service
    }

    fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    async fn submit(
        &self,
        _values: &HashMap<String, String>,
        _cwd: &Path,
    ) -> Result<BackendRef, QueueError> {
        Err(self.unsupported())
    }

    async fn poll_status(
        &self,
        _backend_ref: &BackendRef,
        _cwd: &Path,
    ) -> Result<JobStatus, QueueError> {
        Err(self.unsupported())
    }

    async fn fetch_result(
        &self,
        _backend_ref: &BackendRef,
        _cwd: &Path,
    ) -> Result<ProcessOutput, QueueError> {
        Err(self.unsupported())
    }
}
