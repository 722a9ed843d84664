use serde::{Deserialize, Serialize};

/// 进程执行输出
///
/// 序列化字段名与任务队列协议一致：`returnCode`、`stdout`、`stderr`、`files`。
/// 进程未能启动时 `return_code` 为空，错误信息记录在 `stderr` 中。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutput {
    pub return_code: Option<i32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub files: Vec<String>,
}

impl ProcessOutput {
    pub fn is_success(&self) -> bool {
        self.return_code == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let output = ProcessOutput {
            return_code: Some(0),
            stdout: "hello\n".into(),
            stderr: String::new(),
            files: vec!["/tmp/out.txt".into()],
        };
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["returnCode"], 0);
        assert_eq!(value["files"][0], "/tmp/out.txt");
        assert!(output.is_success());
    }
}
