use std::fmt;
use std::sync::{Mutex, PoisonError};

use bioqueue_core::{JobStatus, ProcessOutput, SchedulerResult};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

/// 作业结束通知通道，载荷为作业ID
pub type FinishedNotifier = mpsc::UnboundedSender<String>;

/// 可在工作线程上执行的工作单元
///
/// `run` 阻塞直到进程结束；控制钩子默认不做任何事。
pub trait Runnable: Send + Sync {
    fn run(&self) -> SchedulerResult<ProcessOutput>;

    /// 用于日志的简短描述
    fn describe(&self) -> String;

    fn kill(&self) {}

    fn suspend(&self) {}

    fn resume(&self) {}
}

/// 任务队列中的一个作业
pub struct QueueJob {
    id: String,
    runnable: Box<dyn Runnable>,
    status: watch::Sender<JobStatus>,
    outcome: Mutex<Option<ProcessOutput>>,
    notifier: Option<FinishedNotifier>,
}

impl QueueJob {
    pub fn new(id: impl Into<String>, runnable: Box<dyn Runnable>) -> Self {
        let (status, _) = watch::channel(JobStatus::Queued);
        Self {
            id: id.into(),
            runnable,
            status,
            outcome: Mutex::new(None),
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: FinishedNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_finished()
    }

    /// 作业结束后的输出，未结束时返回 None
    pub fn result(&self) -> Option<ProcessOutput> {
        if !self.is_finished() {
            return None;
        }
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 等待作业进入终态并返回输出
    pub async fn wait_result(&self) -> ProcessOutput {
        let mut receiver = self.status.subscribe();
        // 发送端归作业所有，等待期间不会关闭
        let _ = receiver.wait_for(JobStatus::is_finished).await;
        self.result().unwrap_or_default()
    }

    pub fn kill(&self) {
        self.runnable.kill();
    }

    pub fn suspend(&self) {
        self.runnable.suspend();
    }

    pub fn resume(&self) {
        self.runnable.resume();
    }

    /// 在当前线程上执行作业，只能执行一次
    pub fn run(&self) {
        if self.status() != JobStatus::Queued {
            warn!(job_id = %self.id, status = %self.status(), "作业已执行过，忽略");
            return;
        }
        let _guard = FinishGuard { job: self };
        self.set_status(JobStatus::Running);
        debug!(job_id = %self.id, command = %self.runnable.describe(), "作业开始运行");

        match self.runnable.run() {
            Ok(output) => {
                let status = if output.is_success() {
                    JobStatus::Completed
                } else {
                    JobStatus::Failed
                };
                debug!(job_id = %self.id, return_code = ?output.return_code, %status, "作业进程已退出");
                self.store_outcome(output);
                self.set_status(status);
            }
            Err(e) => {
                error!(job_id = %self.id, "作业运行失败: {e}");
                self.store_outcome(ProcessOutput {
                    stderr: e.to_string(),
                    ..Default::default()
                });
                self.set_status(JobStatus::Failed);
            }
        }
    }

    fn store_outcome(&self, output: ProcessOutput) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(output);
    }

    fn set_status(&self, status: JobStatus) {
        self.status.send_replace(status);
    }
}

impl fmt::Debug for QueueJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueJob")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

/// 无论作业正常结束还是 panic，都保证发出结束通知
struct FinishGuard<'a> {
    job: &'a QueueJob,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        if self.job.status() == JobStatus::Running {
            self.job.store_outcome(ProcessOutput {
                stderr: "作业执行过程中发生panic".to_string(),
                ..Default::default()
            });
            self.job.set_status(JobStatus::Failed);
        }
        if let Some(notifier) = &self.job.notifier {
            let _ = notifier.send(self.job.id.clone());
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bioqueue_core::SchedulerError;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    pub(crate) struct Fixed(pub i32);

    impl Runnable for Fixed {
        fn run(&self) -> SchedulerResult<ProcessOutput> {
            Ok(ProcessOutput {
                return_code: Some(self.0),
                stdout: format!("rc={}", self.0),
                ..Default::default()
            })
        }

        fn describe(&self) -> String {
            format!("fixed {}", self.0)
        }
    }

    struct Broken;

    impl Runnable for Broken {
        fn run(&self) -> SchedulerResult<ProcessOutput> {
            Err(SchedulerError::Command("no such binary".into()))
        }

        fn describe(&self) -> String {
            "broken".into()
        }
    }

    struct Panicking;

    impl Runnable for Panicking {
        fn run(&self) -> SchedulerResult<ProcessOutput> {
            panic!("boom")
        }

        fn describe(&self) -> String {
            "panicking".into()
        }
    }

    #[test]
    fn test_nonzero_exit_is_failed() {
        let job = QueueJob::new("a", Box::new(Fixed(3)));
        assert_eq!(job.status(), JobStatus::Queued);
        assert!(job.result().is_none());

        job.run();
        assert_eq!(job.status(), JobStatus::Failed);
        let output = job.result().unwrap();
        assert_eq!(output.return_code, Some(3));
        assert_eq!(output.stdout, "rc=3");
    }

    #[test]
    fn test_zero_exit_is_completed() {
        let job = QueueJob::new("z", Box::new(Fixed(0)));
        job.run();
        assert_eq!(job.status(), JobStatus::Completed);
    }

    #[test]
    fn test_runnable_error_is_failed() {
        let job = QueueJob::new("b", Box::new(Broken));
        job.run();
        assert_eq!(job.status(), JobStatus::Failed);
        let output = job.result().unwrap();
        assert!(output.return_code.is_none());
        assert!(output.stderr.contains("no such binary"));
    }

    #[test]
    fn test_panic_still_notifies() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = QueueJob::new("c", Box::new(Panicking)).with_notifier(tx);

        let outcome = catch_unwind(AssertUnwindSafe(|| job.run()));
        assert!(outcome.is_err());
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(rx.try_recv().unwrap(), "c");
    }

    #[test]
    fn test_runs_only_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = QueueJob::new("d", Box::new(Fixed(0))).with_notifier(tx);
        job.run();
        job.run();
        assert_eq!(rx.try_recv().unwrap(), "d");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wait_result_returns_after_run() {
        let job = std::sync::Arc::new(QueueJob::new("e", Box::new(Fixed(0))));
        let runner = job.clone();
        let handle = std::thread::spawn(move || runner.run());
        let output = job.wait_result().await;
        assert_eq!(output.stdout, "rc=0");
        handle.join().unwrap();
    }
}
