use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bioqueue_core::{AppConfig, ServiceCatalog, ShutdownManager};
use bioqueue_dispatcher::{ExecutorRegistry, FirstMatchSelector, Scheduler};
use bioqueue_infrastructure::DatabaseManager;
use bioqueue_worker::TaskQueue;
use tracing::info;

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行任务队列服务
    Queue,
    /// 仅运行调度器
    Scheduler,
    /// 同一进程内运行两者
    All,
}

impl FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queue" => Ok(AppMode::Queue),
            "scheduler" => Ok(AppMode::Scheduler),
            "all" => Ok(AppMode::All),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {s}")),
        }
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    catalog: Arc<ServiceCatalog>,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);
        let catalog =
            ServiceCatalog::from_config(&config.services).context("加载服务目录失败")?;
        info!("已加载 {} 个服务", catalog.len());

        Ok(Self {
            config,
            mode,
            catalog: Arc::new(catalog),
        })
    }

    /// 运行直到关闭信号触发
    pub async fn run(&self, shutdown: ShutdownManager) -> Result<()> {
        match self.mode {
            AppMode::Queue => self.run_queue(shutdown).await,
            AppMode::Scheduler => self.run_scheduler(shutdown).await,
            AppMode::All => self.run_all(shutdown).await,
        }
    }

    async fn start_queue(&self) -> Result<TaskQueue> {
        let queue = TaskQueue::start(&self.config.queue, Arc::clone(&self.catalog))
            .await
            .context("启动任务队列失败")?;
        info!("任务队列服务监听于 {}", queue.local_addr());
        Ok(queue)
    }

    async fn stop_queue(queue: TaskQueue) -> Result<()> {
        let report = queue.shutdown().await.context("关闭任务队列失败")?;
        info!(
            "任务队列已停止: 发送停止信号 {} 个, 丢弃未开始作业 {} 个",
            report.sentinels, report.drained
        );
        Ok(())
    }

    async fn build_scheduler(&self, shutdown: ShutdownManager) -> Result<(DatabaseManager, Arc<Scheduler>)> {
        let database = DatabaseManager::new(&self.config.database)
            .await
            .context("连接数据库失败")?;
        database.migrate().await.context("初始化数据库表结构失败")?;

        let executors = Arc::new(ExecutorRegistry::from_catalog(
            &self.catalog,
            &self.config.scheduler,
        ));
        let scheduler = Scheduler::new(
            database.store(),
            Arc::clone(&self.catalog),
            executors,
            Arc::new(FirstMatchSelector::new()),
            self.config.scheduler.clone(),
            shutdown,
        )
        .await
        .context("创建调度器失败")?;
        Ok((database, scheduler))
    }

    async fn run_queue(&self, shutdown: ShutdownManager) -> Result<()> {
        let queue = self.start_queue().await?;
        shutdown.wait_for_shutdown().await;
        info!("任务队列收到关闭信号");
        Self::stop_queue(queue).await
    }

    async fn run_scheduler(&self, shutdown: ShutdownManager) -> Result<()> {
        let (database, scheduler) = self.build_scheduler(shutdown).await?;
        scheduler.run().await?;
        database.close().await;
        info!("调度器已停止");
        Ok(())
    }

    async fn run_all(&self, shutdown: ShutdownManager) -> Result<()> {
        let queue = self.start_queue().await?;
        let (database, scheduler) = self.build_scheduler(shutdown.clone()).await?;

        let handle = scheduler.start();
        shutdown.wait_for_shutdown().await;
        info!("收到关闭信号，先停止调度器再停止任务队列");
        handle.join().await?;
        database.close().await;

        Self::stop_queue(queue).await
    }
}
