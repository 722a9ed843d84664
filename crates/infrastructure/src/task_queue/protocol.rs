use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 命令与状态码长度
pub const CODE_LEN: usize = 8;

/// 单个载荷允许的最大长度
pub const MAX_PAYLOAD_LEN: u64 = 64 * 1024 * 1024;

/// 协议层错误
///
/// `Transport`、`ShortRead`、`Timeout` 属于传输错误；`Json`、`MissingField` 与
/// `Rejected` 属于协议错误。
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("连接错误: {0}")]
    Transport(#[from] std::io::Error),

    #[error("连接提前关闭: 期望 {expected} 字节, 实际收到 {received} 字节")]
    ShortRead { expected: usize, received: usize },

    #[error("连接超时")]
    Timeout,

    #[error("载荷长度超出限制: {0} 字节")]
    PayloadTooLarge(u64),

    #[error("无效的JSON载荷: {0}")]
    Json(#[from] serde_json::Error),

    #[error("缺少必需字段: {0}")]
    MissingField(&'static str),

    #[error("未知的命令码: {0:?}")]
    UnknownCommand(String),

    #[error("对端返回错误状态")]
    Rejected,

    #[error("无效的状态码: {0:?}")]
    BadStatus(String),
}

impl ProtocolError {
    /// 是否为传输层错误（连接不可用、超时、读写中断）
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::Transport(_) | ProtocolError::ShortRead { .. } | ProtocolError::Timeout
        )
    }
}

/// 请求命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    NewTask,
    JobStatus,
    JobResult,
    Ping,
}

impl Command {
    pub const fn code(&self) -> &'static [u8; CODE_LEN] {
        match self {
            Command::NewTask => b"NEW TASK",
            Command::JobStatus => b"JOB STAT",
            Command::JobResult => b"JOB RES ",
            Command::Ping => b"PING    ",
        }
    }

    pub fn from_code(code: &[u8; CODE_LEN]) -> Option<Self> {
        [
            Command::NewTask,
            Command::JobStatus,
            Command::JobResult,
            Command::Ping,
        ]
        .into_iter()
        .find(|command| command.code() == code)
    }
}

/// 响应状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
}

impl Status {
    pub const fn code(&self) -> &'static [u8; CODE_LEN] {
        match self {
            Status::Ok => b"OK      ",
            Status::Error => b"ERROR   ",
        }
    }

    pub fn from_code(code: &[u8; CODE_LEN]) -> Option<Self> {
        match code {
            b"OK      " => Some(Status::Ok),
            b"ERROR   " => Some(Status::Error),
            _ => None,
        }
    }
}

/// 给单次读写操作加上超时
pub async fn with_timeout<T, F>(limit: Duration, op: F) -> Result<T, ProtocolError>
where
    F: Future<Output = Result<T, ProtocolError>>,
{
    tokio::time::timeout(limit, op)
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

/// 循环读取直到填满缓冲区；对端提前关闭视为传输错误
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut received = 0;
    while received < buf.len() {
        let n = reader.read(&mut buf[received..]).await?;
        if n == 0 {
            return Err(ProtocolError::ShortRead {
                expected: buf.len(),
                received,
            });
        }
        received += n;
    }
    Ok(())
}

pub async fn read_code<R>(reader: &mut R) -> Result<[u8; CODE_LEN], ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut code = [0u8; CODE_LEN];
    read_full(reader, &mut code).await?;
    Ok(code)
}

pub async fn write_code<W>(writer: &mut W, code: &[u8; CODE_LEN]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(code).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_status<R>(reader: &mut R) -> Result<Status, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let code = read_code(reader).await?;
    Status::from_code(&code)
        .ok_or_else(|| ProtocolError::BadStatus(String::from_utf8_lossy(&code).into_owned()))
}

/// 发送一个 JSON 载荷，返回载荷字节数
pub async fn send_json<W, T>(writer: &mut W, value: &T) -> Result<usize, ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let content = serde_json::to_vec(value)?;
    writer.write_all(&(content.len() as u64).to_be_bytes()).await?;
    writer.write_all(&content).await?;
    writer.flush().await?;
    Ok(content.len())
}

/// 接收一个 JSON 载荷
pub async fn recv_json<R, T>(reader: &mut R) -> Result<T, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 8];
    read_full(reader, &mut header).await?;
    let length = u64::from_be_bytes(header);
    if length > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge(length));
    }

    let mut content = vec![0u8; length as usize];
    read_full(reader, &mut content).await?;
    Ok(serde_json::from_slice(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_json_round_trip_preserves_nested_unicode() {
        let payload = json!({
            "service": "比对",
            "options": {"alpha": "foo bar", "nested": {"list": [1, 2.5, null, true]}},
            "emoji": "🧬"
        });
        let (mut client, mut server) = tokio::io::duplex(64);

        let expected = payload.clone();
        let writer = tokio::spawn(async move { send_json(&mut client, &expected).await });
        let received: Value = recv_json(&mut server).await.unwrap();

        assert_eq!(received, payload);
        let sent = writer.await.unwrap().unwrap();
        assert_eq!(sent, serde_json::to_vec(&payload).unwrap().len());
    }

    #[tokio::test]
    async fn test_length_prefix_is_big_endian() {
        let mut buf = Vec::new();
        send_json(&mut buf, &json!({"jobId": "a"})).await.unwrap();
        let body = br#"{"jobId":"a"}"#;
        assert_eq!(&buf[..8], &(body.len() as u64).to_be_bytes());
        assert_eq!(&buf[8..], body);
    }

    #[tokio::test]
    async fn test_fragmented_payload_is_reassembled() {
        let mut frame = Vec::new();
        send_json(&mut frame, &json!({"status": "running"})).await.unwrap();

        let mut reader = trickle_reader(&frame);
        let value: Value = recv_json(&mut reader).await.unwrap();
        assert_eq!(value["status"], "running");
    }

    /// 每次 read 只返回一个字节的读取端
    fn trickle_reader(data: &[u8]) -> impl AsyncRead + Unpin {
        let (mut tx, rx) = tokio::io::duplex(1);
        let data = data.to_vec();
        tokio::spawn(async move {
            for byte in data {
                if tx.write_all(&[byte]).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    #[tokio::test]
    async fn test_short_read_is_transport_error() {
        let mut frame = Vec::new();
        send_json(&mut frame, &json!({"jobId": "abc"})).await.unwrap();
        frame.truncate(frame.len() - 3);

        let err = recv_json::<_, Value>(&mut frame.as_slice()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ShortRead { .. }));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_malformed_json_is_protocol_error() {
        let body = b"{not json";
        let mut frame = (body.len() as u64).to_be_bytes().to_vec();
        frame.extend_from_slice(body);

        let err = recv_json::<_, Value>(&mut frame.as_slice()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));
        assert!(!err.is_transport());
    }

    #[test]
    fn test_codes_are_eight_bytes_and_round_trip() {
        for command in [
            Command::NewTask,
            Command::JobStatus,
            Command::JobResult,
            Command::Ping,
        ] {
            assert_eq!(command.code().len(), CODE_LEN);
            assert_eq!(Command::from_code(command.code()), Some(command));
        }
        assert_eq!(Status::from_code(b"OK      "), Some(Status::Ok));
        assert_eq!(Status::from_code(b"ERROR   "), Some(Status::Error));
        assert_eq!(Command::from_code(b"BOGUS   "), None);
    }
}
