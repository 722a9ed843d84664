use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bioqueue_core::SchedulerError;
use bioqueue_infrastructure::task_queue::client::{JobIdPayload, StatusPayload};
use bioqueue_infrastructure::task_queue::protocol::{
    read_code, recv_json, send_json, with_timeout, write_code,
};
use bioqueue_infrastructure::task_queue::{Command, ProtocolError, Status};
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::command::CommandFactory;
use crate::job::{FinishedNotifier, QueueJob};
use crate::pool::WorkerPool;
use crate::registry::JobRegistry;

/// 单个连接处理过程中的错误
#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("未知作业: {0}")]
    UnknownJob(String),

    #[error("任务队列正在关闭，作业 {0} 不会再执行")]
    Closing(String),

    #[error(transparent)]
    Command(#[from] SchedulerError),
}

/// 连接处理共享的上下文
pub(crate) struct ServerContext {
    pub(crate) registry: Arc<JobRegistry>,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) factory: CommandFactory,
    pub(crate) notifier: FinishedNotifier,
    pub(crate) io_timeout: Duration,
    /// 工作池关闭后置为 true，用于结束仍在等待结果的连接
    pub(crate) closing: watch::Receiver<bool>,
}

/// 任务队列的 TCP 接入循环
pub(crate) struct QueueServer {
    listener: TcpListener,
    context: Arc<ServerContext>,
    running: Arc<AtomicBool>,
    accept_timeout: Duration,
}

impl QueueServer {
    pub(crate) fn new(
        listener: TcpListener,
        context: Arc<ServerContext>,
        running: Arc<AtomicBool>,
        accept_timeout: Duration,
    ) -> Self {
        Self {
            listener,
            context,
            running,
            accept_timeout,
        }
    }

    /// 运行直到 `running` 被清除；接入超时只用于定期检查该标志
    pub(crate) async fn run(self) {
        info!("任务队列开始接收连接");
        while self.running.load(Ordering::SeqCst) {
            match timeout(self.accept_timeout, self.listener.accept()).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    error!("接收连接失败: {e}");
                    sleep(self.accept_timeout).await;
                }
                Ok(Ok((stream, peer))) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!(peer = %peer, "收到新连接");
                    tokio::spawn(serve_client(stream, self.context.clone()));
                }
            }
        }
        info!("任务队列已停止接收连接");
    }
}

/// 处理一个连接上的一条命令，结束后总是关闭连接
async fn serve_client(mut stream: TcpStream, context: Arc<ServerContext>) {
    if let Err(e) = handle_command(&mut stream, &context).await {
        match &e {
            ServeError::Protocol(p) if p.is_transport() => debug!("连接中断: {e}"),
            _ => warn!("请求处理失败: {e}"),
        }
    }
    let _ = stream.shutdown().await;
}

async fn handle_command(
    stream: &mut TcpStream,
    context: &ServerContext,
) -> Result<(), ServeError> {
    let io = context.io_timeout;
    let code = with_timeout(io, read_code(stream)).await?;
    let command = match Command::from_code(&code) {
        Some(command) => command,
        None => {
            reply_error(stream, io).await;
            let code = String::from_utf8_lossy(&code).into_owned();
            return Err(ProtocolError::UnknownCommand(code).into());
        }
    };

    match command {
        Command::Ping => {
            with_timeout(io, write_code(stream, Status::Ok.code())).await?;
            Ok(())
        }
        Command::NewTask => handle_submit(stream, context).await,
        Command::JobStatus => handle_status(stream, context).await,
        Command::JobResult => handle_result(stream, context).await,
    }
}

async fn handle_submit(stream: &mut TcpStream, context: &ServerContext) -> Result<(), ServeError> {
    let io = context.io_timeout;
    let payload: Value = read_payload(stream, io).await?;

    let request = match SubmitPayload::parse(&payload) {
        Ok(request) => request,
        Err(e) => {
            reply_error(stream, io).await;
            return Err(e.into());
        }
    };

    let job_id = uuid::Uuid::new_v4().simple().to_string();
    let command = match context.factory.create(
        &job_id,
        &request.service,
        request.configuration.as_deref(),
        &request.options,
        request.cwd.as_deref(),
    ) {
        Ok(command) => command,
        Err(e) => {
            reply_error(stream, io).await;
            return Err(e.into());
        }
    };

    let job = Arc::new(
        QueueJob::new(job_id.clone(), Box::new(command)).with_notifier(context.notifier.clone()),
    );
    // 先登记再回复，客户端拿到ID后立即查询也能找到
    context.registry.insert(job.clone());
    context.pool.enqueue(job);
    info!(job_id = %job_id, service = %request.service, "新作业已入队");

    reply_ok(stream, io, &JobIdPayload { job_id }).await
}

async fn handle_status(stream: &mut TcpStream, context: &ServerContext) -> Result<(), ServeError> {
    let io = context.io_timeout;
    let job = lookup_job(stream, context).await?;
    reply_ok(stream, io, &StatusPayload { status: job.status() }).await
}

async fn handle_result(stream: &mut TcpStream, context: &ServerContext) -> Result<(), ServeError> {
    let io = context.io_timeout;
    let job = lookup_job(stream, context).await?;
    // 等待不受读写超时限制，但工作池关闭后未执行的作业不会再结束
    tokio::select! {
        biased;
        output = job.wait_result() => reply_ok(stream, io, &output).await,
        _ = wait_closing(context.closing.clone()) => {
            reply_error(stream, io).await;
            Err(ServeError::Closing(job.id().to_string()))
        }
    }
}

async fn wait_closing(mut closing: watch::Receiver<bool>) {
    let closed = closing.wait_for(|closed| *closed).await.is_ok();
    if !closed {
        // 发送端已释放而未关闭，保持等待
        std::future::pending::<()>().await;
    }
}

async fn lookup_job(
    stream: &mut TcpStream,
    context: &ServerContext,
) -> Result<Arc<QueueJob>, ServeError> {
    let io = context.io_timeout;
    let payload: Value = read_payload(stream, io).await?;
    let job_id = match payload.get("jobId").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => {
            reply_error(stream, io).await;
            return Err(ProtocolError::MissingField("jobId").into());
        }
    };
    match context.registry.get(&job_id) {
        Some(job) => Ok(job),
        None => {
            reply_error(stream, io).await;
            Err(ServeError::UnknownJob(job_id))
        }
    }
}

/// 读取请求载荷；JSON 格式错误时回复 `ERROR`
async fn read_payload(stream: &mut TcpStream, io: Duration) -> Result<Value, ServeError> {
    match with_timeout(io, recv_json::<_, Value>(stream)).await {
        Ok(value) => Ok(value),
        Err(e @ ProtocolError::Json(_)) => {
            reply_error(stream, io).await;
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn reply_ok<T: serde::Serialize + Sync>(
    stream: &mut TcpStream,
    io: Duration,
    payload: &T,
) -> Result<(), ServeError> {
    with_timeout(io, async {
        write_code(stream, Status::Ok.code()).await?;
        send_json(stream, payload).await?;
        Ok(())
    })
    .await?;
    Ok(())
}

async fn reply_error(stream: &mut TcpStream, io: Duration) {
    if let Err(e) = with_timeout(io, write_code(stream, Status::Error.code())).await {
        debug!("发送错误状态失败: {e}");
    }
}

/// 解析后的 `NEW TASK` 载荷
#[derive(Debug, PartialEq)]
struct SubmitPayload {
    service: String,
    options: HashMap<String, String>,
    cwd: Option<String>,
    configuration: Option<String>,
}

impl SubmitPayload {
    /// 选项值统一转换为字符串，`null` 视为未提供
    fn parse(payload: &Value) -> Result<Self, ProtocolError> {
        let service = payload
            .get("service")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingField("service"))?
            .to_string();
        let options = payload
            .get("options")
            .and_then(Value::as_object)
            .ok_or(ProtocolError::MissingField("options"))?
            .iter()
            .filter_map(|(name, value)| {
                let value = match value {
                    Value::Null => return None,
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some((name.clone(), value))
            })
            .collect();
        let optional = |key: &str| payload.get(key).and_then(Value::as_str).map(String::from);

        Ok(Self {
            service,
            options,
            cwd: optional("cwd"),
            configuration: optional("configuration"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submit_payload_converts_values() {
        let parsed = SubmitPayload::parse(&json!({
            "service": "blast",
            "options": {"evalue": 0.001, "query": "ACGT", "skip": null, "flag": true},
            "cwd": "/tmp/x"
        }))
        .unwrap();
        assert_eq!(parsed.service, "blast");
        assert_eq!(parsed.options["evalue"], "0.001");
        assert_eq!(parsed.options["flag"], "true");
        assert_eq!(parsed.options["query"], "ACGT");
        assert!(!parsed.options.contains_key("skip"));
        assert_eq!(parsed.cwd.as_deref(), Some("/tmp/x"));
        assert!(parsed.configuration.is_none());
    }

    #[test]
    fn test_submit_payload_requires_service_and_options() {
        let err = SubmitPayload::parse(&json!({"options": {}})).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("service")));
        let err = SubmitPayload::parse(&json!({"service": "x"})).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("options")));
    }
}
