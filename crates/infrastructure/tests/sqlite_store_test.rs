use bioqueue_core::config::DatabaseConfig;
use bioqueue_domain::{
    JobRecordRepository, JobStatus, NewJobRecord, RequestOption, RequestRepository,
    RequestStatus, SchedulerStore, StoreChange,
};
use bioqueue_infrastructure::database::DatabaseManager;
use tempfile::TempDir;

async fn setup() -> (TempDir, DatabaseManager) {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("store.db").display()),
        max_connections: 2,
        connection_timeout_seconds: 5,
    };
    let manager = DatabaseManager::new(&config).await.unwrap();
    manager.migrate().await.unwrap();
    // 迁移可重复执行
    manager.migrate().await.unwrap();
    (dir, manager)
}

fn option(name: &str, value: Option<&str>) -> RequestOption {
    RequestOption {
        name: name.to_string(),
        value: value.map(String::from),
    }
}

fn queued_job(request_id: i64) -> StoreChange {
    StoreChange::CreateJob(NewJobRecord {
        request_id,
        service: "echo".into(),
        configuration: Some("local".into()),
        job_ref: Some("ref-1".into()),
        working_dir: Some("/tmp/job".into()),
        status: JobStatus::Queued,
    })
}

#[tokio::test]
async fn test_pending_requests_load_options_in_order() {
    let (_dir, manager) = setup().await;
    let store = manager.store();

    let first = store
        .create_request("echo", &[option("zeta", Some("1")), option("alpha", None)])
        .await
        .unwrap();
    let second = store.create_request("echo", &[]).await.unwrap();

    let pending = store.find_pending_requests().await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].id, first.id);
    assert_eq!(pending[0].options, first.options);
    assert!(pending[1].options.is_empty());

    let by_uuid = store.find_request_by_uuid(&second.uuid).await.unwrap().unwrap();
    assert_eq!(by_uuid.id, second.id);
    assert!(store.find_request_by_uuid("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_commit_applies_submission_atomically() {
    let (_dir, manager) = setup().await;
    let store = manager.store();
    let request = store.create_request("echo", &[]).await.unwrap();

    store
        .commit(vec![
            queued_job(request.id),
            StoreChange::RequestStatus {
                request_id: request.id,
                status: RequestStatus::Queued,
            },
        ])
        .await
        .unwrap();

    assert!(store.find_pending_requests().await.unwrap().is_empty());
    let active = store.find_active_jobs().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].job_ref.as_deref(), Some("ref-1"));

    // 第二条记录违反唯一约束，整批回滚
    let err = store
        .commit(vec![
            StoreChange::JobStatus {
                request_id: request.id,
                status: JobStatus::Running,
            },
            queued_job(request.id),
        ])
        .await;
    assert!(err.is_err());
    let job = store.find_job_by_request(request.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
}

#[tokio::test]
async fn test_status_never_moves_backward() {
    let (_dir, manager) = setup().await;
    let store = manager.store();
    let request = store.create_request("echo", &[]).await.unwrap();

    store
        .commit(vec![
            queued_job(request.id),
            StoreChange::RequestStatus {
                request_id: request.id,
                status: RequestStatus::Running,
            },
            StoreChange::RequestStatus {
                request_id: request.id,
                status: RequestStatus::Queued,
            },
        ])
        .await
        .unwrap();

    let stored = store.find_request_by_id(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Running);
}

#[tokio::test]
async fn test_finish_job_records_outputs() {
    let (_dir, manager) = setup().await;
    let store = manager.store();
    let request = store.create_request("echo", &[]).await.unwrap();
    store.commit(vec![queued_job(request.id)]).await.unwrap();

    store
        .commit(vec![
            StoreChange::FinishJob {
                request_id: request.id,
                status: JobStatus::Completed,
                return_code: Some(0),
                files: vec!["/tmp/job/out.txt".into(), "/tmp/job/run.log".into()],
            },
            StoreChange::RequestStatus {
                request_id: request.id,
                status: RequestStatus::Completed,
            },
        ])
        .await
        .unwrap();

    let job = store.find_job_by_request(request.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.return_code, Some(0));
    assert_eq!(job.files.len(), 2);
    assert_eq!(job.files[0].title, "out.txt");
    assert!(store.find_active_jobs().await.unwrap().is_empty());

    // 重复的完成记录被忽略
    store
        .commit(vec![StoreChange::FinishJob {
            request_id: request.id,
            status: JobStatus::Failed,
            return_code: Some(1),
            files: vec![],
        }])
        .await
        .unwrap();
    let job = store.find_job_by_request(request.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.files.len(), 2);
}

#[tokio::test]
async fn test_rejected_request_is_failed_with_error_job() {
    let (_dir, manager) = setup().await;
    let store = manager.store();
    let request = store.create_request("unknown", &[]).await.unwrap();

    store
        .commit(StoreChange::rejected(request.id, "unknown", None).to_vec())
        .await
        .unwrap();

    let stored = store.find_request_by_id(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Failed);
    let job = store.find_job_by_request(request.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.return_code.is_none());
    manager.health_check().await.unwrap();
}
