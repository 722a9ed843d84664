#![cfg(unix)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bioqueue_core::{ExecutorKind, JobStatus, QueueConfig, ServiceCatalog};
use bioqueue_infrastructure::task_queue::protocol::{read_status, write_code};
use bioqueue_infrastructure::task_queue::{
    Command, ProtocolError, QueueClient, Status, SubmitRequest,
};
use bioqueue_testing_utils::{ServiceConfigBuilder, TestEnv};
use bioqueue_worker::TaskQueue;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

async fn start_queue(num_workers: usize) -> (TempDir, TaskQueue, QueueClient) {
    let dir = tempfile::tempdir().unwrap();
    let service = ServiceConfigBuilder::new("echo")
        .with_option("alpha", "-a=${value}", None)
        .with_output_path("out.txt")
        .with_configuration(
            "local",
            ExecutorKind::Shell,
            "sh -c 'echo \"$0\" | tee out.txt'",
        )
        .build();
    let failing = ServiceConfigBuilder::new("fail")
        .with_configuration("local", ExecutorKind::Shell, "sh -c 'echo oops >&2; exit 3'")
        .build();
    let slow = ServiceConfigBuilder::new("nap")
        .with_configuration("local", ExecutorKind::Shell, "sleep 2")
        .build();
    let catalog = Arc::new(ServiceCatalog::from_config(&[service, failing, slow]).unwrap());
    let config = QueueConfig {
        host: "127.0.0.1".into(),
        port: 0,
        num_workers,
        io_timeout_seconds: 5,
        accept_timeout_seconds: 1,
        work_dir: dir.path().join("work"),
    };
    let queue = TaskQueue::start(&config, catalog).await.unwrap();
    let client = QueueClient::new(queue.local_addr().to_string(), Duration::from_secs(5));
    (dir, queue, client)
}

fn echo_request(value: &str) -> SubmitRequest {
    SubmitRequest {
        service: "echo".into(),
        options: HashMap::from([("alpha".to_string(), value.to_string())]),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_submit_status_and_result() {
    let (_dir, queue, client) = start_queue(2).await;

    let deferred = client.submit(&echo_request("foo bar")).await.unwrap();
    // 提交后立即可查
    let status = deferred.status().await.unwrap();
    assert!(matches!(
        status,
        JobStatus::Queued | JobStatus::Running | JobStatus::Completed
    ));

    let handle = &deferred;
    let finished = TestEnv::wait_for(
        move || async move { handle.status().await.unwrap().is_finished() },
        Duration::from_secs(10),
    )
    .await;
    assert!(finished);
    assert_eq!(deferred.status().await.unwrap(), JobStatus::Completed);

    let output = deferred.result().await.unwrap();
    assert_eq!(output.return_code, Some(0));
    assert_eq!(output.stdout, "-a=foo bar\n");
    assert_eq!(output.files.len(), 1);
    assert!(output.files[0].ends_with("out.txt"));

    // 结果可以重复获取
    let again = deferred.result().await.unwrap();
    assert_eq!(again, output);

    queue.shutdown().await.unwrap();
}

fn plain_request(service: &str) -> SubmitRequest {
    SubmitRequest {
        service: service.into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_nonzero_exit_is_failed() {
    let (_dir, queue, client) = start_queue(1).await;

    let deferred = client.submit(&plain_request("fail")).await.unwrap();
    let output = deferred.result().await.unwrap();
    assert_eq!(output.return_code, Some(3));
    assert_eq!(output.stderr, "oops\n");

    // 状态不再变化时，连续两次查询结果一致
    let first = deferred.status().await.unwrap();
    let second = deferred.status().await.unwrap();
    assert_eq!(first, JobStatus::Failed);
    assert_eq!(first, second);

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_repeated_status_of_queued_job_is_stable() {
    let (_dir, queue, client) = start_queue(1).await;

    // 唯一的工作线程被占用，第二个作业停留在队列中
    client.submit(&plain_request("nap")).await.unwrap();
    let waiting = client.submit(&plain_request("nap")).await.unwrap();
    let first = waiting.status().await.unwrap();
    let second = waiting.status().await.unwrap();
    assert_eq!(first, JobStatus::Queued);
    assert_eq!(first, second);

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_answers_pending_result_of_discarded_job() {
    let (_dir, queue, client) = start_queue(1).await;

    let running = client.submit(&plain_request("nap")).await.unwrap();
    let discarded = client.submit(&plain_request("nap")).await.unwrap();
    let waiter = tokio::spawn(async move { discarded.result().await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let report = queue.shutdown().await.unwrap();
    assert_eq!(report.drained, 1);

    let outcome = tokio::time::timeout(Duration::from_secs(10), waiter)
        .await
        .expect("pending result wait must end after shutdown")
        .unwrap();
    assert!(outcome.is_err());
    drop(running);
}

#[tokio::test]
async fn test_explicit_cwd_is_used() {
    let (dir, queue, client) = start_queue(1).await;
    let cwd = dir.path().join("explicit");
    let mut request = echo_request("x");
    request.cwd = Some(cwd.to_string_lossy().into_owned());

    let deferred = client.submit(&request).await.unwrap();
    let output = deferred.result().await.unwrap();
    assert_eq!(output.return_code, Some(0));
    assert!(cwd.join("out.txt").exists());

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ping_and_rejections() {
    let (_dir, queue, client) = start_queue(1).await;
    assert!(client.check_connection().await);

    let err = client.job_status("no-such-job").await.unwrap_err();
    assert!(matches!(err, ProtocolError::Rejected));

    let err = client
        .submit(&SubmitRequest {
            service: "unknown".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Rejected));

    let mut request = echo_request("x");
    request.configuration = Some("grid".into());
    let err = client.submit(&request).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Rejected));
    assert!(queue.registry().is_empty());

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_payload_gets_error_status() {
    let (_dir, queue, _client) = start_queue(1).await;

    let mut stream = TcpStream::connect(queue.local_addr()).await.unwrap();
    write_code(&mut stream, Command::NewTask.code()).await.unwrap();
    stream.write_all(&3u64.to_be_bytes()).await.unwrap();
    stream.write_all(b"{x}").await.unwrap();
    assert_eq!(read_status(&mut stream).await.unwrap(), Status::Error);

    let mut stream = TcpStream::connect(queue.local_addr()).await.unwrap();
    write_code(&mut stream, b"BOGUS   ").await.unwrap();
    assert_eq!(read_status(&mut stream).await.unwrap(), Status::Error);

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_every_worker() {
    let (_dir, queue, client) = start_queue(3).await;
    assert_eq!(queue.alive_workers(), 3);
    client.submit(&echo_request("a")).await.unwrap();

    let address = queue.local_addr();
    let report = queue.shutdown().await.unwrap();
    assert_eq!(report.sentinels, 3);

    let late = QueueClient::new(address.to_string(), Duration::from_secs(1));
    assert!(!late.check_connection().await);
}
