use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use bioqueue_core::{Configuration, JobStatus, ProcessOutput, QueueError, ServiceDescriptor};
use tokio::process::Command;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use super::{build_command, BackendRef, Executor};

#[derive(Debug, Clone)]
enum ShellOutcome {
    Exited {
        return_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// 等待子进程时发生系统错误
    Lost(String),
}

type Outcome = watch::Receiver<Option<ShellOutcome>>;

/// 在调度器进程内直接运行子进程的执行器
///
/// 后端引用只在当前进程内有效，重启后无法恢复。
pub struct ShellExecutor {
    service: Arc<ServiceDescriptor>,
    configuration: Configuration,
    processes: Arc<RwLock<HashMap<String, Outcome>>>,
}

impl ShellExecutor {
    pub fn new(service: Arc<ServiceDescriptor>, configuration: Configuration) -> Self {
        Self {
            service,
            configuration,
            processes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn outcome(&self, backend_ref: &BackendRef) -> Result<Outcome, QueueError> {
        self.processes
            .read()
            .await
            .get(backend_ref.as_str())
            .cloned()
            .ok_or_else(|| QueueError::JobNotFound(backend_ref.to_string()))
    }

    /// 当前跟踪的子进程数量
    pub async fn tracked(&self) -> usize {
        self.processes.read().await.len()
    }
}

#[async_trait]
impl Executor for ShellExecutor {
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
        let argv = build_command(&self.service, &self.configuration, values)?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| QueueError::Broken("命令为空".to_string()))?;

        let child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .envs(&self.configuration.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| QueueError::Broken(format!("启动命令 {program} 失败: {e}")))?;

        let key = uuid::Uuid::new_v4().simple().to_string();
        let (tx, rx) = watch::channel(None);
        self.processes.write().await.insert(key.clone(), rx);

        let job_key = key.clone();
        tokio::spawn(async move {
            let outcome = match child.wait_with_output().await {
                Ok(output) => ShellOutcome::Exited {
                    return_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                },
                Err(e) => {
                    warn!(job = %job_key, "等待子进程失败: {e}");
                    ShellOutcome::Lost(e.to_string())
                }
            };
            tx.send_replace(Some(outcome));
        });

        info!(
            service = %self.service.name,
            job = %key,
            command = %argv.join(" "),
            "子进程已启动"
        );
        Ok(BackendRef::new(key))
    }

    async fn poll_status(
        &self,
        backend_ref: &BackendRef,
        _cwd: &Path,
    ) -> Result<JobStatus, QueueError> {
        let outcome = self.outcome(backend_ref).await?;
        let status = match &*outcome.borrow() {
            None => JobStatus::Running,
            Some(ShellOutcome::Exited {
                return_code: Some(0),
                ..
            }) => JobStatus::Completed,
            Some(ShellOutcome::Exited { .. }) => JobStatus::Failed,
            Some(ShellOutcome::Lost(_)) => JobStatus::Error,
        };
        Ok(status)
    }

    async fn fetch_result(
        &self,
        backend_ref: &BackendRef,
        cwd: &Path,
    ) -> Result<ProcessOutput, QueueError> {
        let mut outcome = self.outcome(backend_ref).await?;
        let finished = outcome
            .wait_for(Option::is_some)
            .await
            .map(|value| value.clone())
            .map_err(|_| QueueError::Broken(format!("子进程 {backend_ref} 的结果已丢失")))?;
        self.processes.write().await.remove(backend_ref.as_str());
        debug!(job = %backend_ref, "子进程结果已取走");

        match finished {
            Some(ShellOutcome::Exited {
                return_code,
                stdout,
                stderr,
            }) => Ok(ProcessOutput {
                return_code,
                stdout,
                stderr,
                files: self.service.collect_outputs(cwd),
            }),
            Some(ShellOutcome::Lost(reason)) => Err(QueueError::Broken(reason)),
            None => Err(QueueError::Broken(format!("子进程 {backend_ref} 没有结果"))),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use bioqueue_core::{ExecutorKind, ServiceCatalog};
    use bioqueue_testing_utils::ServiceConfigBuilder;

    fn executor(bin: &str) -> ShellExecutor {
        let config = ServiceConfigBuilder::new("echo")
            .with_option("alpha", "-a=${value}", None)
            .with_output_pattern(r"out\..*")
            .with_configuration("local", ExecutorKind::Shell, bin)
            .build();
        let catalog = ServiceCatalog::from_config(&[config]).unwrap();
        let service = catalog.get("echo").unwrap();
        let configuration = service.configurations[0].clone();
        ShellExecutor::new(service, configuration)
    }

    #[tokio::test]
    async fn test_completed_process_result() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor("sh -c 'echo \"$0\" > out.txt; echo \"$0\"'");
        let values = HashMap::from([("alpha".to_string(), "foo bar".to_string())]);

        let job = executor.submit(&values, dir.path()).await.unwrap();
        let output = executor.fetch_result(&job, dir.path()).await.unwrap();
        assert_eq!(output.return_code, Some(0));
        assert_eq!(output.stdout, "-a=foo bar\n");
        assert_eq!(output.files.len(), 1);

        // 结果取走后引用失效
        let err = executor.poll_status(&job, dir.path()).await.unwrap_err();
        assert!(matches!(err, QueueError::JobNotFound(_)));
        assert_eq!(executor.tracked().await, 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor("sh -c 'exit 3'");
        let job = executor.submit(&HashMap::new(), dir.path()).await.unwrap();

        let mut status = executor.poll_status(&job, dir.path()).await.unwrap();
        for _ in 0..100 {
            if status.is_finished() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            status = executor.poll_status(&job, dir.path()).await.unwrap();
        }
        assert_eq!(status, JobStatus::Failed);
        let output = executor.fetch_result(&job, dir.path()).await.unwrap();
        assert_eq!(output.return_code, Some(3));
    }

    #[tokio::test]
    async fn test_missing_binary_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor("/nonexistent/tool");
        let err = executor.submit(&HashMap::new(), dir.path()).await.unwrap_err();
        assert!(matches!(err, QueueError::Broken(_)));
    }
}
