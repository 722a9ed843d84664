use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use bioqueue_core::{JobStatus, ProcessOutput};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use super::protocol::{
    read_status, recv_json, send_json, with_timeout, write_code, Command, ProtocolError, Status,
};

/// `NEW TASK` 请求载荷
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitRequest {
    pub service: String,
    pub options: HashMap<String, String>,
    /// 指定工作目录，缺省时由任务队列创建
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// 指定执行配置，缺省时使用服务的第一个配置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobIdPayload {
    #[serde(rename = "jobId")]
    pub job_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusPayload {
    pub status: JobStatus,
}

/// 任务队列客户端，每次请求使用一个新连接
#[derive(Debug, Clone)]
pub struct QueueClient {
    address: String,
    io_timeout: Duration,
}

impl QueueClient {
    pub fn new(address: impl Into<String>, io_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            io_timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<TcpStream, ProtocolError> {
        with_timeout(self.io_timeout, async {
            TcpStream::connect(&self.address)
                .await
                .map_err(ProtocolError::from)
        })
        .await
    }

    /// 发送命令与载荷，读取状态码，成功时读取响应载荷
    async fn exchange<Req, Resp>(&self, command: Command, payload: &Req) -> Result<Resp, ProtocolError>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        let mut stream = self.connect().await?;
        let result = with_timeout(self.io_timeout, async {
            write_code(&mut stream, command.code()).await?;
            send_json(&mut stream, payload).await?;
            match read_status(&mut stream).await? {
                Status::Ok => recv_json(&mut stream).await,
                Status::Error => Err(ProtocolError::Rejected),
            }
        })
        .await;
        let _ = stream.shutdown().await;
        result
    }

    /// 提交作业，立即返回远程句柄
    pub async fn submit(&self, request: &SubmitRequest) -> Result<DeferredResult, ProtocolError> {
        let payload: JobIdPayload = self.exchange(Command::NewTask, request).await?;
        debug!(job_id = %payload.job_id, service = %request.service, "作业已提交到任务队列");
        Ok(DeferredResult {
            job_id: payload.job_id,
            client: self.clone(),
        })
    }

    pub async fn job_status(&self, job_id: &str) -> Result<JobStatus, ProtocolError> {
        let payload: StatusPayload = self
            .exchange(Command::JobStatus, &JobIdPayload { job_id: job_id.to_string() })
            .await?;
        Ok(payload.status)
    }

    pub async fn job_result(&self, job_id: &str) -> Result<ProcessOutput, ProtocolError> {
        self.exchange(Command::JobResult, &JobIdPayload { job_id: job_id.to_string() })
            .await
    }

    /// 存活检查：只有收到 `OK` 才返回 true
    pub async fn check_connection(&self) -> bool {
        let ping = async {
            let mut stream = self.connect().await?;
            let status = with_timeout(self.io_timeout, async {
                write_code(&mut stream, Command::Ping.code()).await?;
                read_status(&mut stream).await
            })
            .await;
            let _ = stream.shutdown().await;
            status
        };
        matches!(ping.await, Ok(Status::Ok))
    }
}

/// 提交后返回给调用方的远程句柄，用于之后轮询状态与结果
#[derive(Clone)]
pub struct DeferredResult {
    job_id: String,
    client: QueueClient,
}

impl DeferredResult {
    pub fn new(job_id: impl Into<String>, client: QueueClient) -> Self {
        Self {
            job_id: job_id.into(),
            client,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub async fn status(&self) -> Result<JobStatus, ProtocolError> {
        self.client.job_status(&self.job_id).await
    }

    /// 调用方应先轮询到终态再获取结果
    pub async fn result(&self) -> Result<ProcessOutput, ProtocolError> {
        self.client.job_result(&self.job_id).await
    }
}

impl fmt::Debug for DeferredResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<DeferredResult {} server={}>", self.job_id, self.client.address)
    }
}
