use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bioqueue_core::{QueueConfig, SchedulerError, SchedulerResult, ServiceCatalog};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::CommandFactory;
use crate::pool::{DrainReport, WorkerPool};
use crate::registry::JobRegistry;
use crate::server::{QueueServer, ServerContext};

/// 任务队列服务：TCP 接入循环 + 工作池 + 作业登记表
pub struct TaskQueue {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    pool: Arc<WorkerPool>,
    registry: Arc<JobRegistry>,
    server: JoinHandle<()>,
    closing: watch::Sender<bool>,
    finished_listener: JoinHandle<()>,
}

impl TaskQueue {
    /// 绑定监听地址并启动工作线程
    pub async fn start(config: &QueueConfig, catalog: Arc<ServiceCatalog>) -> SchedulerResult<Self> {
        let listener = TcpListener::bind(config.address()).await.map_err(|e| {
            SchedulerError::Configuration(format!("无法监听 {}: {e}", config.address()))
        })?;
        let local_addr = listener.local_addr()?;

        let pool = Arc::new(WorkerPool::start(config.num_workers)?);
        let registry = Arc::new(JobRegistry::new());
        let (notifier, mut finished) = mpsc::unbounded_channel::<String>();

        let listener_registry = registry.clone();
        let finished_listener = tokio::spawn(async move {
            while let Some(job_id) = finished.recv().await {
                let status = listener_registry.status(&job_id);
                debug!(job_id = %job_id, status = ?status, "作业已结束");
            }
        });

        let running = Arc::new(AtomicBool::new(true));
        let (closing, closing_rx) = watch::channel(false);
        let context = Arc::new(ServerContext {
            registry: registry.clone(),
            pool: pool.clone(),
            factory: CommandFactory::new(catalog, &config.work_dir),
            notifier,
            io_timeout: config.io_timeout(),
            closing: closing_rx,
        });
        let server = QueueServer::new(listener, context, running.clone(), config.accept_timeout());
        let server = tokio::spawn(server.run());

        info!("任务队列已启动: {local_addr}, 工作线程数: {}", config.num_workers);
        Ok(Self {
            local_addr,
            running,
            pool,
            registry,
            server,
            closing,
            finished_listener,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    pub fn alive_workers(&self) -> usize {
        self.pool.alive_workers()
    }

    /// 停止接收连接，丢弃未开始的作业并等待工作线程退出
    ///
    /// 正在运行的作业会先执行完；之后仍在等待被丢弃作业结果的连接收到 `ERROR`。
    pub async fn shutdown(self) -> SchedulerResult<DrainReport> {
        info!("正在关闭任务队列...");
        self.running.store(false, Ordering::SeqCst);

        // 主动连接一次以唤醒阻塞中的 accept
        let mut wake_addr = self.local_addr;
        if wake_addr.ip().is_unspecified() {
            wake_addr.set_ip([127, 0, 0, 1].into());
        }
        if let Err(e) = TcpStream::connect(wake_addr).await {
            debug!("唤醒监听循环失败: {e}");
        }

        let pool = self.pool.clone();
        let report = tokio::task::spawn_blocking(move || pool.shutdown())
            .await
            .map_err(|e| SchedulerError::Internal(format!("关闭工作池失败: {e}")))?;
        self.closing.send_replace(true);

        if let Err(e) = self.server.await {
            warn!("监听循环异常退出: {e}");
        }
        self.finished_listener.abort();

        info!(
            sentinels = report.sentinels,
            drained = report.drained,
            "任务队列已关闭"
        );
        Ok(report)
    }
}
