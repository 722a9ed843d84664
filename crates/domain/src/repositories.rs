//! 领域仓储抽象
//!
//! 定义调度核心消费的存储接口，遵循依赖倒置原则。
//! 表结构与迁移属于存储实现本身，这里只描述读写契约。

use async_trait::async_trait;
use bioqueue_core::SchedulerResult;

use crate::entities::{JobRecord, Request, RequestOption};
use crate::value_objects::StoreChange;

/// 请求仓储抽象
#[async_trait]
pub trait RequestRepository: Send + Sync {
    /// 创建一个待处理请求（由外部接口层调用）
    async fn create_request(
        &self,
        service: &str,
        options: &[RequestOption],
    ) -> SchedulerResult<Request>;
    async fn find_request_by_id(&self, id: i64) -> SchedulerResult<Option<Request>>;
    /// 按对外标识查询请求（供外部接口层查询状态）
    async fn find_request_by_uuid(&self, uuid: &str) -> SchedulerResult<Option<Request>>;
    /// 所有待处理请求，连同其选项一并加载
    async fn find_pending_requests(&self) -> SchedulerResult<Vec<Request>>;
}

/// 作业记录仓储抽象
#[async_trait]
pub trait JobRecordRepository: Send + Sync {
    async fn find_job_by_request(&self, request_id: i64) -> SchedulerResult<Option<JobRecord>>;
    /// 仍处于 `queued` / `running` 状态的作业记录
    async fn find_active_jobs(&self) -> SchedulerResult<Vec<JobRecord>>;
}

/// 调度器使用的存储
#[async_trait]
pub trait SchedulerStore: RequestRepository + JobRecordRepository {
    /// 在单个事务中应用一批变更，任一变更失败则整批回滚
    async fn commit(&self, changes: Vec<StoreChange>) -> SchedulerResult<()>;
}
