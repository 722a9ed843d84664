use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bioqueue_core::{Configuration, JobStatus, ProcessOutput, QueueError, ServiceDescriptor};
use bioqueue_infrastructure::{ProtocolError, QueueClient, SubmitRequest};
use tracing::debug;

use super::{BackendRef, Executor};

/// 把作业委托给任务队列服务执行
///
/// 后端引用是任务队列返回的作业ID；任务队列在自己的服务目录中
/// 按同名执行配置构建命令，并使用调度器分配的工作目录。
pub struct QueuedExecutor {
    service: Arc<ServiceDescriptor>,
    configuration: Configuration,
    client: QueueClient,
}

impl QueuedExecutor {
    pub fn new(
        service: Arc<ServiceDescriptor>,
        configuration: Configuration,
        client: QueueClient,
    ) -> Self {
        Self {
            service,
            configuration,
            client,
        }
    }

    pub fn client(&self) -> &QueueClient {
        &self.client
    }
}

/// 传输错误属于暂时不可用；对端拒绝或载荷异常视为作业损坏
fn classify(err: ProtocolError, rejected: impl FnOnce() -> QueueError) -> QueueError {
    match err {
        e if e.is_transport() => QueueError::Unavailable(e.to_string()),
        ProtocolError::Rejected => rejected(),
        e => QueueError::Broken(e.to_string()),
    }
}

#[async_trait]
impl Executor for QueuedExecutor {
    fn service(&self) -> &Arc<ServiceDescriptor> {
        &self.service
    }

    fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    async fn submit(
        &self,
        values: &HashMap<String, String>,
        cwd: &Path,
    ) -> Result<BackendRef, QueueError> {
        let request = SubmitRequest {
            service: self.service.name.clone(),
            options: values.clone(),
            cwd: Some(cwd.to_string_lossy().into_owned()),
            configuration: Some(self.configuration.name.clone()),
        };
        let deferred = self.client.submit(&request).await.map_err(|e| {
            classify(e, || {
                QueueError::Broken(format!("任务队列拒绝了服务 {} 的作业", self.service.name))
            })
        })?;
        debug!(job = ?deferred, "作业已委托给任务队列");
        Ok(BackendRef::new(deferred.job_id()))
    }

    async fn poll_status(
        &self,
        backend_ref: &BackendRef,
        _cwd: &Path,
    ) -> Result<JobStatus, QueueError> {
        self.client
            .job_status(backend_ref.as_str())
            .await
            .map_err(|e| classify(e, || QueueError::JobNotFound(backend_ref.to_string())))
    }

    async fn fetch_result(
        &self,
        backend_ref: &BackendRef,
        _cwd: &Path,
    ) -> Result<ProcessOutput, QueueError> {
        self.client
            .job_result(backend_ref.as_str())
            .await
            .map_err(|e| classify(e, || QueueError::JobNotFound(backend_ref.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let transport = ProtocolError::Timeout;
        assert!(matches!(
            classify(transport, || unreachable!()),
            QueueError::Unavailable(_)
        ));

        let rejected = classify(ProtocolError::Rejected, || {
            QueueError::JobNotFound("j".into())
        });
        assert_eq!(rejected, QueueError::JobNotFound("j".into()));

        let malformed = classify(ProtocolError::MissingField("status"), || unreachable!());
        assert!(matches!(malformed, QueueError::Broken(_)));
    }
}
