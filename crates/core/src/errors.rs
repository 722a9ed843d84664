use thiserror::Error;

/// 执行后端错误类型
///
/// 封闭的错误种类枚举，调度循环必须逐一处理每种情况：
/// `Unavailable` 为暂时性错误，下一轮重试；其余两种视为作业已损坏。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("执行后端暂不可用: {0}")]
    Unavailable(String),

    #[error("执行后端无法恢复该作业: {0}")]
    Broken(String),

    #[error("执行后端找不到作业: {0}")]
    JobNotFound(String),
}

impl QueueError {
    /// 是否为暂时性错误（保持状态不变，下一轮重试）
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Unavailable(_))
    }
}

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("请求未找到: {id}")]
    RequestNotFound { id: i64 },

    #[error("作业记录未找到: request_id={request_id}")]
    JobNotFound { request_id: i64 },

    #[error("服务未找到: {name}")]
    ServiceNotFound { name: String },

    #[error("执行后端错误: {0}")]
    Queue(#[from] QueueError),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("命令构建错误: {0}")]
    Command(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;
