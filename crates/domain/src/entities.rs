//! 领域实体
//!
//! 请求（Request）由外部接口层创建，之后只由调度器修改；
//! 作业记录（JobRecord）在调度器成功提交请求后创建，是重启后恢复在途作业的唯一依据。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use bioqueue_core::JobStatus;

/// 请求状态，只能沿 `pending → queued → (running) → {completed | failed}` 前进
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Queued => "queued",
            RequestStatus::Running => "running",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            RequestStatus::Pending => 0,
            RequestStatus::Queued => 1,
            RequestStatus::Running => 2,
            RequestStatus::Completed | RequestStatus::Failed => 3,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }

    /// 是否为严格向前的转换
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        next.rank() > self.rank()
    }

    /// 作业状态对应的请求状态
    pub fn from_job_status(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued => RequestStatus::Queued,
            JobStatus::Running => RequestStatus::Running,
            JobStatus::Completed => RequestStatus::Completed,
            JobStatus::Failed | JobStatus::Error => RequestStatus::Failed,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "queued" => Ok(RequestStatus::Queued),
            "running" => Ok(RequestStatus::Running),
            "completed" => Ok(RequestStatus::Completed),
            "failed" => Ok(RequestStatus::Failed),
            _ => Err(format!("Invalid request status: {s}")),
        }
    }
}

/// 请求选项（保持提交时的顺序）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestOption {
    pub name: String,
    pub value: Option<String>,
}

/// 外部提交的作业请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: i64,
    /// 对外暴露的请求标识
    pub uuid: String,
    pub service: String,
    pub status: RequestStatus,
    pub options: Vec<RequestOption>,
    pub created_at: DateTime<Utc>,
}

impl Request {
    /// 选项名到值的映射，未赋值的选项被忽略
    pub fn option_values(&self) -> HashMap<String, String> {
        self.options
            .iter()
            .filter_map(|opt| opt.value.clone().map(|value| (opt.name.clone(), value)))
            .collect()
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

/// 作业输出文件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputFile {
    pub id: String,
    pub title: String,
    pub path: String,
}

/// 持久化的作业记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub request_id: i64,
    pub service: String,
    /// 选中的执行配置，配置选择失败时为空
    pub configuration: Option<String>,
    /// 执行后端返回的作业引用，只有创建它的执行器能解释其格式
    pub job_ref: Option<String>,
    pub working_dir: Option<String>,
    pub status: JobStatus,
    pub return_code: Option<i32>,
    pub files: Vec<OutputFile>,
}

impl JobRecord {
    pub fn is_active(&self) -> bool {
        matches!(self.status, JobStatus::Queued | JobStatus::Running)
    }
}
