use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use async_trait::async_trait;
use bioqueue_core::{Configuration, JobStatus, ProcessOutput, QueueError, ServiceDescriptor};
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{build_command, BackendRef, Executor};

const STARTED_FILE: &str = "started";
const FINISHED_FILE: &str = "finished";
const STDOUT_FILE: &str = "stdout.txt";
const STDERR_FILE: &str = "stderr.txt";

fn submission_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"Your job (\d+) \(.+\) has been submitted").expect("invalid submission regex")
    })
}

/// 通过 qsub 提交、qstat 轮询的 Grid Engine 执行器
///
/// 提交的包装脚本在开始时创建 `started`，结束时把退出码写入 `finished`，
/// 作业从 qstat 列表中消失后依靠这两个文件判断最终状态。
pub struct GridEngineExecutor {
    service: Arc<ServiceDescriptor>,
    configuration: Configuration,
    user: String,
}

impl GridEngineExecutor {
    pub fn new(service: Arc<ServiceDescriptor>, configuration: Configuration) -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .unwrap_or_else(|_| "*".to_string());
        Self {
            service,
            configuration,
            user,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }
}

/// 生成通过标准输入交给 qsub 的包装脚本
pub fn wrapper_script(argv: &[String]) -> Result<String, QueueError> {
    let command = shlex::try_join(argv.iter().map(String::as_str))
        .map_err(|e| QueueError::Broken(format!("命令无法转义: {e}")))?;
    Ok(format!(
        "touch {STARTED_FILE}\n{command}\necho $? > {FINISHED_FILE}\n"
    ))
}

/// 从 qsub 的回执中提取作业ID
pub fn parse_submission(stdout: &str) -> Option<String> {
    submission_regex()
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
}

/// 在 qstat 列表中查找作业的状态码
pub fn find_state<'a>(listing: &'a str, job_id: &str) -> Option<&'a str> {
    listing.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [id, _, _, _, state, ..] if *id == job_id => Some(*state),
            _ => None,
        }
    })
}

/// Grid Engine 状态码映射；未知状态码视为暂时不可用
pub fn map_state(state: &str) -> Result<JobStatus, QueueError> {
    match state {
        "r" | "t" | "s" => Ok(JobStatus::Running),
        "qw" | "T" => Ok(JobStatus::Queued),
        "d" | "dr" | "E" | "Eqw" => Ok(JobStatus::Failed),
        other => Err(QueueError::Unavailable(format!("未知的作业状态码: {other}"))),
    }
}

fn modified(path: &Path) -> std::io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}

fn read_return_code(cwd: &Path) -> Option<i32> {
    std::fs::read_to_string(cwd.join(FINISHED_FILE))
        .ok()
        .and_then(|content| content.trim().parse().ok())
}

/// 作业已不在 qstat 列表中时，根据标记文件推断状态
pub fn status_from_markers(cwd: &Path) -> Result<JobStatus, QueueError> {
    let started = match modified(&cwd.join(STARTED_FILE)) {
        Ok(time) => time,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(JobStatus::Queued),
        Err(e) => return Err(QueueError::Unavailable(e.to_string())),
    };
    let finished = match modified(&cwd.join(FINISHED_FILE)) {
        Ok(time) => time,
        // 文件系统尚未同步
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(JobStatus::Running),
        Err(e) => return Err(QueueError::Unavailable(e.to_string())),
    };
    if finished < started {
        return Ok(JobStatus::Running);
    }
    Ok(match read_return_code(cwd) {
        Some(0) | None => JobStatus::Completed,
        Some(_) => JobStatus::Failed,
    })
}

fn read_optional(path: &Path) -> Result<String, QueueError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(QueueError::Broken(format!("读取 {} 失败: {e}", path.display()))),
    }
}

fn spawn_error(program: &str, err: std::io::Error) -> QueueError {
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied => {
            QueueError::Broken(format!("无法执行 {program}: {err}"))
        }
        _ => QueueError::Unavailable(format!("无法执行 {program}: {err}")),
    }
}

#[async_trait]
impl Executor for GridEngineExecutor {
    fn service(&self) -> &Arc<ServiceDescriptor> {
        &self.service
    }

    fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    async fn submit(
        &self,
        values: &HashMap<String, String>,
        cwd: &Path,
    ) -> Result<BackendRef, QueueError> {
        let argv = build_command(&self.service, &self.configuration, values)?;
        let script = wrapper_script(&argv)?;
        let program = &self.configuration.submit_command;

        let mut child = Command::new(program)
            .args(["-cwd", "-e", STDERR_FILE, "-o", STDOUT_FILE])
            .args(&self.configuration.queue_args)
            .current_dir(cwd)
            .envs(&self.configuration.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(program, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .await
                .map_err(|e| QueueError::Unavailable(format!("写入提交脚本失败: {e}")))?;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| QueueError::Unavailable(format!("等待 {program} 失败: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            warn!(
                return_code = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "{program} 提交失败"
            );
            return Err(QueueError::Unavailable(format!(
                "{program} 退出码 {:?}",
                output.status.code()
            )));
        }
        let job_id = parse_submission(&stdout)
            .ok_or_else(|| QueueError::Broken(format!("无法解析提交回执: {}", stdout.trim())))?;

        info!(service = %self.service.name, job_id = %job_id, "作业已提交到 Grid Engine");
        Ok(BackendRef::new(job_id))
    }

    async fn poll_status(
        &self,
        backend_ref: &BackendRef,
        cwd: &Path,
    ) -> Result<JobStatus, QueueError> {
        let program = &self.configuration.status_command;
        let output = Command::new(program)
            .args(["-u", self.user.as_str()])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| QueueError::Unavailable(format!("无法执行 {program}: {e}")))?;
        if !output.status.success() {
            return Err(QueueError::Unavailable(format!(
                "{program} 退出码 {:?}",
                output.status.code()
            )));
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        match find_state(&listing, backend_ref.as_str()) {
            Some(state) => {
                debug!(job_id = %backend_ref, state, "qstat 状态");
                map_state(state)
            }
            None => status_from_markers(cwd),
        }
    }

    async fn fetch_result(
        &self,
        _backend_ref: &BackendRef,
        cwd: &Path,
    ) -> Result<ProcessOutput, QueueError> {
        Ok(ProcessOutput {
            return_code: read_return_code(cwd),
            stdout: read_optional(&cwd.join(STDOUT_FILE))?,
            stderr: read_optional(&cwd.join(STDERR_FILE))?,
            files: self.service.collect_outputs(cwd),
        })
    }
}
