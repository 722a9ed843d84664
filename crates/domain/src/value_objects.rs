//! 值对象
//!
//! 调度循环在一轮处理中只收集 [`StoreChange`]，在整轮结束后一次性提交，
//! 因此执行器调用期间不会持有任何存储事务。

use serde::{Deserialize, Serialize};

use crate::entities::{JobStatus, RequestStatus};

/// 待创建的作业记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJobRecord {
    pub request_id: i64,
    pub service: String,
    pub configuration: Option<String>,
    pub job_ref: Option<String>,
    pub working_dir: Option<String>,
    pub status: JobStatus,
}

/// 一次存储变更
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreChange {
    /// 创建作业记录
    CreateJob(NewJobRecord),
    /// 推进请求状态（非前进的转换会被忽略）
    RequestStatus {
        request_id: i64,
        status: RequestStatus,
    },
    /// 推进作业状态（非前进的转换会被忽略）
    JobStatus { request_id: i64, status: JobStatus },
    /// 作业进入终态：写入状态、返回码与输出文件
    FinishJob {
        request_id: i64,
        status: JobStatus,
        return_code: Option<i32>,
        files: Vec<String>,
    },
}

impl StoreChange {
    /// 请求被拒绝：写入一条 `error` 状态的作业记录并将请求标记为失败
    pub fn rejected(
        request_id: i64,
        service: &str,
        configuration: Option<String>,
    ) -> [StoreChange; 2] {
        [
            StoreChange::CreateJob(NewJobRecord {
                request_id,
                service: service.to_string(),
                configuration,
                job_ref: None,
                working_dir: None,
                status: JobStatus::Error,
            }),
            StoreChange::RequestStatus {
                request_id,
                status: RequestStatus::Failed,
            },
        ]
    }

    pub fn request_id(&self) -> i64 {
        match self {
            StoreChange::CreateJob(job) => job.request_id,
            StoreChange::RequestStatus { request_id, .. }
            | StoreChange::JobStatus { request_id, .. }
            | StoreChange::FinishJob { request_id, .. } => *request_id,
        }
    }
}
