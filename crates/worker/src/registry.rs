use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use bioqueue_core::JobStatus;

use crate::job::QueueJob;

/// 作业ID到作业的映射
///
/// 作业从提交起一直保留，保证结果至少能被取走一次。
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<QueueJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Arc<QueueJob>) {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.id().to_string(), job);
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<QueueJob>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.get(job_id).map(|job| job.status())
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
