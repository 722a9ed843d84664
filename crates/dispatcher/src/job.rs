use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use bioqueue_core::{JobStatus, ProcessOutput, QueueError};
use tracing::debug;

use crate::executors::{BackendRef, Executor};

/// 调度器内存中的作业句柄
///
/// 状态和结果都委托给创建它的执行器查询；最近一次观察到的状态会被缓存，
/// 并且只会向前推进。
pub struct Job {
    executor: Arc<dyn Executor>,
    backend_ref: BackendRef,
    cwd: PathBuf,
    cached_status: Mutex<Option<JobStatus>>,
}

impl Job {
    /// 在 `work_root` 下创建独立的工作目录并提交作业
    pub async fn start(
        executor: Arc<dyn Executor>,
        values: &HashMap<String, String>,
        work_root: &Path,
    ) -> Result<Self, QueueError> {
        let cwd = work_root.join(uuid::Uuid::new_v4().simple().to_string());
        tokio::fs::create_dir_all(&cwd).await.map_err(|e| {
            QueueError::Broken(format!("无法创建工作目录 {}: {e}", cwd.display()))
        })?;

        let backend_ref = executor.submit(values, &cwd).await?;
        Ok(Self {
            executor,
            backend_ref,
            cwd,
            cached_status: Mutex::new(Some(JobStatus::Queued)),
        })
    }

    /// 根据持久化的作业记录重建句柄，不会重新提交
    pub fn restore(
        executor: Arc<dyn Executor>,
        backend_ref: BackendRef,
        cwd: PathBuf,
        last_status: JobStatus,
    ) -> Self {
        Self {
            executor,
            backend_ref,
            cwd,
            cached_status: Mutex::new(Some(last_status)),
        }
    }

    pub fn backend_ref(&self) -> &BackendRef {
        &self.backend_ref
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    pub fn cached_status(&self) -> Option<JobStatus> {
        *self.cached_status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 查询后端状态
    ///
    /// 已进入终态后不再访问后端；后端报告的倒退状态会被忽略。
    /// 暂时不可用不影响缓存，其他错误把缓存置为 `error`。
    pub async fn status(&self) -> Result<JobStatus, QueueError> {
        if let Some(status) = self.cached_status().filter(JobStatus::is_finished) {
            return Ok(status);
        }

        let polled = self.executor.poll_status(&self.backend_ref, &self.cwd).await;
        let mut cached = self
            .cached_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match polled {
            Ok(status) => {
                let next = match *cached {
                    Some(previous) if !previous.can_advance_to(status) => {
                        debug!(job = %self.backend_ref, from = %previous, to = %status, "忽略倒退的作业状态");
                        previous
                    }
                    _ => status,
                };
                *cached = Some(next);
                Ok(next)
            }
            Err(e) => {
                if !e.is_transient() {
                    *cached = Some(JobStatus::Error);
                }
                Err(e)
            }
        }
    }

    pub async fn is_finished(&self) -> Result<bool, QueueError> {
        Ok(self.status().await?.is_finished())
    }

    /// 作业输出；缓存状态尚未进入终态时返回 None
    pub async fn result(&self) -> Result<Option<ProcessOutput>, QueueError> {
        match self.cached_status() {
            Some(status) if status.is_finished() => self
                .executor
                .fetch_result(&self.backend_ref, &self.cwd)
                .await
                .map(Some),
            _ => Ok(None),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("service", &self.executor.service().name)
            .field("configuration", &self.executor.configuration().name)
            .field("backend_ref", &self.backend_ref)
            .field("cwd", &self.cwd)
            .field("cached_status", &self.cached_status())
            .finish()
    }
}
