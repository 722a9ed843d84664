//! In-memory store used by scheduler tests
//!
//! Mirrors the persistence rules of the SQLite store: commits are atomic,
//! status changes only move forward and a finished job is never rewritten.

use async_trait::async_trait;
use bioqueue_core::{SchedulerError, SchedulerResult};
use bioqueue_domain::{
    JobRecord, JobRecordRepository, OutputFile, Request, RequestOption, RequestRepository,
    RequestStatus, SchedulerStore, StoreChange,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
struct State {
    requests: BTreeMap<i64, Request>,
    jobs: BTreeMap<i64, JobRecord>,
    next_request_id: i64,
    next_job_id: i64,
}

impl State {
    fn apply(&mut self, change: StoreChange) -> SchedulerResult<()> {
        match change {
            StoreChange::CreateJob(job) => {
                if self.jobs.contains_key(&job.request_id) {
                    return Err(SchedulerError::DatabaseOperation(format!(
                        "duplicate job for request {}",
                        job.request_id
                    )));
                }
                if !self.requests.contains_key(&job.request_id) {
                    return Err(SchedulerError::RequestNotFound { id: job.request_id });
                }
                self.next_job_id += 1;
                self.jobs.insert(
                    job.request_id,
                    JobRecord {
                        id: self.next_job_id,
                        request_id: job.request_id,
                        service: job.service,
                        configuration: job.configuration,
                        job_ref: job.job_ref,
                        working_dir: job.working_dir,
                        status: job.status,
                        return_code: None,
                        files: Vec::new(),
                    },
                );
            }
            StoreChange::RequestStatus { request_id, status } => {
                let request = self
                    .requests
                    .get_mut(&request_id)
                    .ok_or(SchedulerError::RequestNotFound { id: request_id })?;
                if request.status.can_transition_to(status) {
                    request.status = status;
                }
            }
            StoreChange::JobStatus { request_id, status } => {
                let job = self
                    .jobs
                    .get_mut(&request_id)
                    .ok_or(SchedulerError::JobNotFound { request_id })?;
                if job.status != status && job.status.can_advance_to(status) {
                    job.status = status;
                }
            }
            StoreChange::FinishJob {
                request_id,
                status,
                return_code,
                files,
            } => {
                let job = self
                    .jobs
                    .get_mut(&request_id)
                    .ok_or(SchedulerError::JobNotFound { request_id })?;
                if !job.status.is_finished() {
                    job.status = status;
                    job.return_code = return_code;
                    job.files = files
                        .into_iter()
                        .enumerate()
                        .map(|(i, path)| OutputFile {
                            id: format!("file-{request_id}-{i}"),
                            title: Path::new(&path)
                                .file_name()
                                .map(|name| name.to_string_lossy().into_owned())
                                .unwrap_or_else(|| path.clone()),
                            path,
                        })
                        .collect();
                }
            }
        }
        Ok(())
    }
}

/// Mock implementation of SchedulerStore for testing
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<State>>,
    fail_commits: Arc<Mutex<usize>>,
    commits: Arc<Mutex<Vec<Vec<StoreChange>>>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a request with a fixed id, bypassing `create_request`
    pub fn insert_request(&self, request: Request) {
        let mut state = self.state.lock().unwrap();
        state.next_request_id = state.next_request_id.max(request.id);
        state.requests.insert(request.id, request);
    }

    /// Insert a job record keyed by its request id
    pub fn insert_job(&self, job: JobRecord) {
        let mut state = self.state.lock().unwrap();
        state.next_job_id = state.next_job_id.max(job.id);
        state.jobs.insert(job.request_id, job);
    }

    /// Make the next `count` commits fail without applying anything
    pub fn fail_next_commits(&self, count: usize) {
        *self.fail_commits.lock().unwrap() = count;
    }

    pub fn request(&self, id: i64) -> Option<Request> {
        self.state.lock().unwrap().requests.get(&id).cloned()
    }

    pub fn job(&self, request_id: i64) -> Option<JobRecord> {
        self.state.lock().unwrap().jobs.get(&request_id).cloned()
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        self.state.lock().unwrap().jobs.values().cloned().collect()
    }

    /// Every successfully committed batch, in order
    pub fn committed(&self) -> Vec<Vec<StoreChange>> {
        self.commits.lock().unwrap().clone()
    }
}

#[async_trait]
impl RequestRepository for MockStore {
    async fn create_request(
        &self,
        service: &str,
        options: &[RequestOption],
    ) -> SchedulerResult<Request> {
        let mut state = self.state.lock().unwrap();
        state.next_request_id += 1;
        let request = Request {
            id: state.next_request_id,
            uuid: uuid::Uuid::new_v4().simple().to_string(),
            service: service.to_string(),
            status: RequestStatus::Pending,
            options: options.to_vec(),
            created_at: Utc::now(),
        };
        state.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn find_request_by_id(&self, id: i64) -> SchedulerResult<Option<Request>> {
        Ok(self.request(id))
    }

    async fn find_request_by_uuid(&self, uuid: &str) -> SchedulerResult<Option<Request>> {
        let state = self.state.lock().unwrap();
        Ok(state.requests.values().find(|r| r.uuid == uuid).cloned())
    }

    async fn find_pending_requests(&self) -> SchedulerResult<Vec<Request>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .requests
            .values()
            .filter(|r| r.is_pending())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl JobRecordRepository for MockStore {
    async fn find_job_by_request(&self, request_id: i64) -> SchedulerResult<Option<JobRecord>> {
        Ok(self.job(request_id))
    }

    async fn find_active_jobs(&self) -> SchedulerResult<Vec<JobRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.jobs.values().filter(|j| j.is_active()).cloned().collect())
    }
}

#[async_trait]
impl SchedulerStore for MockStore {
    async fn commit(&self, changes: Vec<StoreChange>) -> SchedulerResult<()> {
        {
            let mut failures = self.fail_commits.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SchedulerError::DatabaseOperation(
                    "injected commit failure".to_string(),
                ));
            }
        }

        let mut state = self.state.lock().unwrap();
        let mut staged = state.clone();
        for change in changes.iter().cloned() {
            staged.apply(change)?;
        }
        *state = staged;
        self.commits.lock().unwrap().push(changes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bioqueue_domain::{JobStatus, NewJobRecord};

    #[tokio::test]
    async fn test_commit_is_atomic() {
        let store = MockStore::new();
        let request = store.create_request("echo", &[]).await.unwrap();
        let create = StoreChange::CreateJob(NewJobRecord {
            request_id: request.id,
            service: "echo".into(),
            configuration: None,
            job_ref: None,
            working_dir: None,
            status: JobStatus::Queued,
        });

        store.commit(vec![create.clone()]).await.unwrap();
        let err = store
            .commit(vec![
                StoreChange::RequestStatus {
                    request_id: request.id,
                    status: RequestStatus::Queued,
                },
                create,
            ])
            .await;
        assert!(err.is_err());
        assert_eq!(store.request(request.id).unwrap().status, RequestStatus::Pending);
        assert_eq!(store.committed().len(), 1);
    }
}
