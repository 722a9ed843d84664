use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bioqueue_core::{
    ExecutorKind, QueueError, SchedulerConfig, SchedulerError, SchedulerResult, ServiceCatalog,
    ShutdownManager,
};
use bioqueue_domain::{
    JobStatus, NewJobRecord, Request, RequestStatus, SchedulerStore, StoreChange,
};
use bioqueue_infrastructure::QueueClient;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::job::Job;
use crate::limits::ConfigurationSelector;
use crate::recovery::{recover_jobs, RecoveryReport};
use crate::registry::ExecutorRegistry;

/// 一轮处理的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// 成功提交或收集完成的作业数
    pub processed: usize,
    /// 被拒绝或标记为损坏的作业数
    pub rejected: usize,
    /// 因后端暂时不可用而推迟到下一轮的作业数
    pub deferred: usize,
}

/// 作业调度器
///
/// 提交循环把待处理请求交给执行器，收集循环轮询被跟踪的作业直到结束。
/// 两个循环共享被跟踪作业表，表锁只在内存读改写期间持有。
pub struct Scheduler {
    store: Arc<dyn SchedulerStore>,
    catalog: Arc<ServiceCatalog>,
    executors: Arc<ExecutorRegistry>,
    selector: Arc<dyn ConfigurationSelector>,
    config: SchedulerConfig,
    tracked: Mutex<HashMap<i64, Arc<Job>>>,
    shutdown: ShutdownManager,
    recovery: RecoveryReport,
}

impl Scheduler {
    /// 创建调度器并恢复上次运行遗留的活动作业
    pub async fn new(
        store: Arc<dyn SchedulerStore>,
        catalog: Arc<ServiceCatalog>,
        executors: Arc<ExecutorRegistry>,
        selector: Arc<dyn ConfigurationSelector>,
        config: SchedulerConfig,
        shutdown: ShutdownManager,
    ) -> SchedulerResult<Arc<Self>> {
        tokio::fs::create_dir_all(&config.work_dir).await?;
        let (tracked, recovery) = recover_jobs(store.as_ref(), &executors).await?;

        if executors.uses_kind(ExecutorKind::Queue) {
            let client = QueueClient::new(config.queue_address(), config.queue_timeout());
            if !client.check_connection().await {
                warn!("任务队列 {} 当前不可达，相关作业将在恢复后提交", client.address());
            }
        }

        info!(
            "调度器已创建: 服务数={}, 执行器数={}, 选择策略={}, 恢复作业数={}",
            catalog.len(),
            executors.len(),
            selector.name(),
            recovery.restored
        );
        Ok(Arc::new(Self {
            store,
            catalog,
            executors,
            selector,
            config,
            tracked: Mutex::new(tracked),
            shutdown,
            recovery,
        }))
    }

    fn tracked(&self) -> MutexGuard<'_, HashMap<i64, Arc<Job>>> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked().len()
    }

    pub fn tracked_job(&self, request_id: i64) -> Option<Arc<Job>> {
        self.tracked().get(&request_id).cloned()
    }

    /// 处理一个待处理请求，返回要提交的变更和新作业
    async fn submit_request(
        &self,
        request: &Request,
        summary: &mut PassSummary,
    ) -> (Vec<StoreChange>, Option<Arc<Job>>) {
        let Some(service) = self.catalog.get(&request.service) else {
            warn!(request_id = request.id, "未知服务: {}", request.service);
            summary.rejected += 1;
            return (StoreChange::rejected(request.id, &request.service, None).to_vec(), None);
        };

        let values = request.option_values();
        let Some(configuration) = self.selector.select(&service, &values) else {
            warn!(request_id = request.id, service = %service.name, "没有满足限制的执行配置");
            summary.rejected += 1;
            return (StoreChange::rejected(request.id, &service.name, None).to_vec(), None);
        };
        let configuration = configuration.name.clone();

        let Some(executor) = self.executors.get(&service.name, &configuration) else {
            error!(request_id = request.id, "执行配置 {}/{} 没有对应的执行器", service.name, configuration);
            summary.rejected += 1;
            return (
                StoreChange::rejected(request.id, &service.name, Some(configuration)).to_vec(),
                None,
            );
        };

        match Job::start(executor, &values, &self.config.work_dir).await {
            Ok(job) => {
                info!(
                    request_id = request.id,
                    service = %service.name,
                    configuration = %configuration,
                    job = %job.backend_ref(),
                    "作业已提交"
                );
                summary.processed += 1;
                let changes = vec![
                    StoreChange::CreateJob(NewJobRecord {
                        request_id: request.id,
                        service: service.name.clone(),
                        configuration: Some(configuration),
                        job_ref: Some(job.backend_ref().to_string()),
                        working_dir: Some(job.cwd().to_string_lossy().into_owned()),
                        status: JobStatus::Queued,
                    }),
                    StoreChange::RequestStatus {
                        request_id: request.id,
                        status: RequestStatus::Queued,
                    },
                ];
                (changes, Some(Arc::new(job)))
            }
            Err(QueueError::Unavailable(reason)) => {
                warn!(request_id = request.id, "执行后端暂不可用，下一轮重试: {reason}");
                summary.deferred += 1;
                (Vec::new(), None)
            }
            Err(e) => {
                error!(request_id = request.id, "作业提交失败: {e}");
                summary.rejected += 1;
                (
                    StoreChange::rejected(request.id, &service.name, Some(configuration)).to_vec(),
                    None,
                )
            }
        }
    }

    /// 提交一轮待处理请求，整轮结束后一次性提交存储变更
    pub async fn submission_pass(&self) -> SchedulerResult<PassSummary> {
        let pending = self.store.find_pending_requests().await?;
        let mut summary = PassSummary::default();
        if pending.is_empty() {
            return Ok(summary);
        }

        let mut changes = Vec::new();
        let mut started = Vec::new();
        for request in &pending {
            let already_tracked = self.tracked().contains_key(&request.id);
            if already_tracked {
                continue;
            }
            let (request_changes, job) = self.submit_request(request, &mut summary).await;
            changes.extend(request_changes);
            if let Some(job) = job {
                started.push((request.id, job));
            }
        }

        if !changes.is_empty() {
            self.store.commit(changes).await?;
        }
        self.tracked().extend(started);
        debug!(?summary, "提交轮次结束");
        Ok(summary)
    }

    /// 轮询所有被跟踪的作业，持久化状态变化并移除已结束的作业
    pub async fn collection_pass(&self) -> SchedulerResult<PassSummary> {
        let snapshot: Vec<(i64, Arc<Job>)> = self
            .tracked()
            .iter()
            .map(|(id, job)| (*id, job.clone()))
            .collect();
        let mut summary = PassSummary::default();
        if snapshot.is_empty() {
            return Ok(summary);
        }

        let polls = join_all(snapshot.into_iter().map(|(request_id, job)| async move {
            let before = job.cached_status();
            let status = job.status().await;
            (request_id, job, before, status)
        }))
        .await;

        let mut changes = Vec::new();
        let mut finished = Vec::new();
        for (request_id, job, before, status) in polls {
            match status {
                Ok(status) if status.is_finished() => match job.result().await {
                    Ok(output) => {
                        let output = output.unwrap_or_default();
                        info!(
                            request_id,
                            status = %status,
                            return_code = ?output.return_code,
                            "作业已结束"
                        );
                        changes.push(StoreChange::FinishJob {
                            request_id,
                            status,
                            return_code: output.return_code,
                            files: output.files,
                        });
                        changes.push(StoreChange::RequestStatus {
                            request_id,
                            status: RequestStatus::from_job_status(status),
                        });
                        finished.push(request_id);
                        summary.processed += 1;
                    }
                    Err(QueueError::Unavailable(reason)) => {
                        debug!(request_id, "获取结果时后端暂不可用: {reason}");
                        summary.deferred += 1;
                    }
                    Err(e) => {
                        warn!(request_id, "获取作业结果失败: {e}");
                        changes.extend(broken(request_id));
                        finished.push(request_id);
                        summary.rejected += 1;
                    }
                },
                Ok(status) => {
                    if before != Some(status) {
                        debug!(request_id, status = %status, "作业状态变化");
                        changes.push(StoreChange::JobStatus { request_id, status });
                        changes.push(StoreChange::RequestStatus {
                            request_id,
                            status: RequestStatus::from_job_status(status),
                        });
                    }
                }
                Err(QueueError::Unavailable(reason)) => {
                    debug!(request_id, "查询状态时后端暂不可用: {reason}");
                    summary.deferred += 1;
                }
                Err(e) => {
                    warn!(request_id, "作业已损坏: {e}");
                    changes.extend(broken(request_id));
                    finished.push(request_id);
                    summary.rejected += 1;
                }
            }
        }

        if !changes.is_empty() {
            self.store.commit(changes).await?;
        }
        let mut tracked = self.tracked();
        for request_id in finished {
            tracked.remove(&request_id);
        }
        Ok(summary)
    }

    async fn submission_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown.subscribe().await;
        let interval = self.config.poll_interval();
        info!("提交循环已启动, 间隔 {:?}", interval);
        loop {
            if let Err(e) = self.submission_pass().await {
                error!("提交轮次失败: {e}");
            }
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = sleep(interval) => {}
            }
        }
        info!("提交循环已停止");
    }

    /// 收集循环中的任何错误都会触发整个调度器关闭
    async fn collection_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown.subscribe().await;
        let interval = self.config.collect_interval();
        info!("收集循环已启动, 间隔 {:?}", interval);
        loop {
            if let Err(e) = self.collection_pass().await {
                error!("收集轮次发生致命错误，调度器即将关闭: {e}");
                self.shutdown.shutdown().await;
                break;
            }
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = sleep(interval) => {}
            }
        }
        info!("收集循环已停止");
    }

    /// 启动两个调度循环
    pub fn start(self: &Arc<Self>) -> SchedulerHandle {
        SchedulerHandle {
            submission: tokio::spawn(self.clone().submission_loop()),
            collection: tokio::spawn(self.clone().collection_loop()),
            shutdown: self.shutdown.clone(),
        }
    }

    /// 阻塞模式：运行直到收到关闭信号
    pub async fn run(self: Arc<Self>) -> SchedulerResult<()> {
        let handle = self.start();
        self.shutdown.wait_for_shutdown().await;
        handle.join().await
    }
}

fn broken(request_id: i64) -> [StoreChange; 2] {
    [
        StoreChange::FinishJob {
            request_id,
            status: JobStatus::Error,
            return_code: None,
            files: Vec::new(),
        },
        StoreChange::RequestStatus {
            request_id,
            status: RequestStatus::Failed,
        },
    ]
}

/// 运行中的调度循环句柄
pub struct SchedulerHandle {
    submission: JoinHandle<()>,
    collection: JoinHandle<()>,
    shutdown: ShutdownManager,
}

impl SchedulerHandle {
    /// 发出关闭信号并等待两个循环退出
    pub async fn stop(self) -> SchedulerResult<()> {
        self.shutdown.shutdown().await;
        self.join().await
    }

    /// 等待两个循环退出
    pub async fn join(self) -> SchedulerResult<()> {
        let (submission, collection) = tokio::join!(self.submission, self.collection);
        for result in [submission, collection] {
            result.map_err(|e| SchedulerError::Internal(format!("调度循环异常退出: {e}")))?;
        }
        Ok(())
    }

    /// 给循环留出的最长退出时间
    pub async fn stop_with_timeout(self, limit: Duration) -> SchedulerResult<()> {
        tokio::time::timeout(limit, self.stop())
            .await
            .map_err(|_| SchedulerError::Internal("等待调度循环退出超时".to_string()))?
    }
}
