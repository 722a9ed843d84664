use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bioqueue_core::SchedulerResult;
use bioqueue_domain::{JobRecord, JobStatus, RequestStatus, SchedulerStore, StoreChange};
use tracing::{info, warn};

use crate::executors::BackendRef;
use crate::job::Job;
use crate::registry::ExecutorRegistry;

/// 启动恢复结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// 重新纳入跟踪的作业数
    pub restored: usize,
    /// 无法重建而被标记为错误的作业数
    pub discarded: usize,
}

/// 为每条仍处于活动状态的作业记录重建句柄，不会重新提交
///
/// 无法重建的记录（执行配置已不存在、缺少后端引用）在同一事务中标记为错误。
pub async fn recover_jobs(
    store: &dyn SchedulerStore,
    executors: &ExecutorRegistry,
) -> SchedulerResult<(HashMap<i64, Arc<Job>>, RecoveryReport)> {
    let records = store.find_active_jobs().await?;
    let mut tracked = HashMap::new();
    let mut changes = Vec::new();
    let mut report = RecoveryReport::default();

    for record in records {
        match restore(&record, executors) {
            Ok(job) => {
                info!(request_id = record.request_id, job = ?job, "恢复作业跟踪");
                tracked.insert(record.request_id, Arc::new(job));
                report.restored += 1;
            }
            Err(reason) => {
                warn!(request_id = record.request_id, "无法恢复作业: {reason}");
                changes.push(StoreChange::FinishJob {
                    request_id: record.request_id,
                    status: JobStatus::Error,
                    return_code: None,
                    files: Vec::new(),
                });
                changes.push(StoreChange::RequestStatus {
                    request_id: record.request_id,
                    status: RequestStatus::Failed,
                });
                report.discarded += 1;
            }
        }
    }

    if !changes.is_empty() {
        store.commit(changes).await?;
    }
    info!(
        restored = report.restored,
        discarded = report.discarded,
        "启动恢复完成"
    );
    Ok((tracked, report))
}

fn restore(record: &JobRecord, executors: &ExecutorRegistry) -> Result<Job, String> {
    let configuration = record
        .configuration
        .as_deref()
        .ok_or_else(|| "作业记录缺少执行配置".to_string())?;
    let executor = executors
        .get(&record.service, configuration)
        .ok_or_else(|| format!("执行配置 {}/{} 已不存在", record.service, configuration))?;
    let job_ref = record
        .job_ref
        .clone()
        .ok_or_else(|| "作业记录缺少后端引用".to_string())?;
    let working_dir = record
        .working_dir
        .as_deref()
        .ok_or_else(|| "作业记录缺少工作目录".to_string())?;

    Ok(Job::restore(
        executor,
        BackendRef::new(job_ref),
        PathBuf::from(working_dir),
        record.status,
    ))
}
