use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// 服务定义：选项模板、输出声明以及按声明顺序排列的执行配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub options: Vec<OptionConfig>,
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
    #[serde(default)]
    pub configurations: Vec<ConfigurationConfig>,
}

/// 命令行选项模板，`param` 中的 `$value` / `${value}` 会被替换为实际值
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionConfig {
    pub name: String,
    pub param: String,
    #[serde(default)]
    pub default: Option<String>,
}

/// 输出文件声明
///
/// - 只给出 `path`：固定文件名
/// - 给出 `option` 和 `path`：文件名作为该选项的值传给命令
/// - 只给出 `pattern`：对工作目录文件名做正则匹配
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub option: Option<String>,
}

/// 执行后端类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// 调度器进程内直接启动子进程
    Shell,
    /// 通过任务队列协议提交到远程任务队列
    Queue,
    /// 通过 qsub/qstat 提交到 Grid Engine
    GridEngine,
    /// 预留扩展点
    Cluster,
}

/// 一个服务的具体执行配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationConfig {
    pub name: String,
    pub executor: ExecutorKind,
    pub bin: String,
    #[serde(default)]
    pub queue_args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: Vec<LimitRule>,
    /// Grid Engine 提交命令，默认 `qsub`
    #[serde(default)]
    pub submit_command: Option<String>,
    /// Grid Engine 状态查询命令，默认 `qstat`
    #[serde(default)]
    pub status_command: Option<String>,
}

/// 资源限制规则，配置的所有规则都满足时该配置才可被选中
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LimitRule {
    pub option: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub one_of: Option<Vec<String>>,
}

impl ServiceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            return Err(anyhow::anyhow!("服务名称不能为空"));
        }

        if self.configurations.is_empty() {
            return Err(anyhow::anyhow!("服务 {} 至少需要一个执行配置", self.name));
        }

        let mut seen = HashSet::new();
        for option in &self.options {
            if !seen.insert(option.name.as_str()) {
                return Err(anyhow::anyhow!(
                    "服务 {} 的选项重复: {}",
                    self.name,
                    option.name
                ));
            }
        }

        for output in &self.outputs {
            output.validate()?;
            if let Some(option) = &output.option {
                if !seen.contains(option.as_str()) {
                    return Err(anyhow::anyhow!(
                        "服务 {} 的输出绑定了不存在的选项: {}",
                        self.name,
                        option
                    ));
                }
            }
        }

        let mut names = HashSet::new();
        for configuration in &self.configurations {
            if !names.insert(configuration.name.as_str()) {
                return Err(anyhow::anyhow!(
                    "服务 {} 的执行配置重复: {}",
                    self.name,
                    configuration.name
                ));
            }
            if configuration.bin.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "执行配置 {}/{} 的可执行文件不能为空",
                    self.name,
                    configuration.name
                ));
            }
        }

        Ok(())
    }
}

impl OutputConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        match (&self.path, &self.pattern, &self.option) {
            (Some(_), None, _) => Ok(()),
            (None, Some(_), None) => Ok(()),
            _ => Err(anyhow::anyhow!(
                "输出声明必须只包含 path（可选 option）或 pattern 其中之一"
            )),
        }
    }
}
