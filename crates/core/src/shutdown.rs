use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// 优雅关闭管理器
///
/// 调度循环、任务队列和主进程共享同一个实例；任一方触发关闭，所有订阅者都会收到信号。
#[derive(Clone)]
pub struct ShutdownManager {
    /// 关闭信号发送器
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
    /// 是否已经关闭
    is_shutdown: Arc<RwLock<bool>>,
}

impl ShutdownManager {
    /// 创建新的关闭管理器
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            shutdown_tx: Arc::new(RwLock::new(Some(shutdown_tx))),
            is_shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// 订阅关闭信号
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        let shutdown_tx = self.shutdown_tx.read().await;
        if let Some(ref tx) = *shutdown_tx {
            tx.subscribe()
        } else {
            // 如果已经关闭，创建一个立即触发的接收器
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            rx
        }
    }

    /// 触发关闭，重复调用是无害的
    pub async fn shutdown(&self) {
        let mut is_shutdown = self.is_shutdown.write().await;
        if *is_shutdown {
            debug!("关闭管理器已经触发过关闭");
            return;
        }
        *is_shutdown = true;

        // 发送与清理在同一把写锁内完成，之后的订阅者拿到的都是立即触发的接收器
        let mut shutdown_tx = self.shutdown_tx.write().await;
        if let Some(tx) = shutdown_tx.take() {
            info!("触发系统关闭，通知 {} 个订阅者", tx.receiver_count());
            let _ = tx.send(());
        }
    }

    /// 检查是否已经关闭
    pub async fn is_shutdown(&self) -> bool {
        *self.is_shutdown.read().await
    }

    /// 等待关闭信号
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.subscribe().await;
        let _ = rx.recv().await;
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
