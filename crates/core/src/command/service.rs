use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::config::{ConfigurationConfig, ExecutorKind, LimitRule, ServiceConfig};
use crate::errors::{Result, SchedulerError};

use super::option::{render_arguments, CommandOption};
use super::output::OutputDeclaration;
use super::template::expand_env;

/// 服务的一个执行配置，加载后只读
#[derive(Debug, Clone)]
pub struct Configuration {
    pub name: String,
    pub executor: ExecutorKind,
    /// 已按 shell 规则切分的可执行命令
    pub bin: Vec<String>,
    pub queue_args: Vec<String>,
    /// 已完成变量插值的环境变量覆盖
    pub env: BTreeMap<String, String>,
    pub limits: Vec<LimitRule>,
    pub submit_command: String,
    pub status_command: String,
}

impl Configuration {
    pub fn from_config(config: &ConfigurationConfig) -> Result<Self> {
        let bin = shlex::split(&config.bin)
            .filter(|tokens| !tokens.is_empty())
            .ok_or_else(|| {
                SchedulerError::Configuration(format!(
                    "执行配置 {} 的可执行文件无法解析: {}",
                    config.name, config.bin
                ))
            })?;
        let env = config
            .env
            .iter()
            .map(|(key, value)| {
                let expanded = expand_env(value, |name| std::env::var(name).ok());
                (key.clone(), expanded)
            })
            .collect();

        Ok(Self {
            name: config.name.clone(),
            executor: config.executor,
            bin,
            queue_args: config.queue_args.clone(),
            env,
            limits: config.limits.clone(),
            submit_command: config
                .submit_command
                .clone()
                .unwrap_or_else(|| "qsub".to_string()),
            status_command: config
                .status_command
                .clone()
                .unwrap_or_else(|| "qstat".to_string()),
        })
    }
}

/// 数据驱动的服务描述，所有执行后端共用
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    pub options: Vec<CommandOption>,
    pub outputs: Vec<OutputDeclaration>,
    pub configurations: Vec<Configuration>,
}

impl ServiceDescriptor {
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let outputs = config
            .outputs
            .iter()
            .map(OutputDeclaration::from_config)
            .collect::<Result<Vec<_>>>()?;
        let configurations = config
            .configurations
            .iter()
            .map(Configuration::from_config)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: config.name.clone(),
            options: config.options.iter().map(CommandOption::from).collect(),
            outputs,
            configurations,
        })
    }

    pub fn configuration(&self, name: &str) -> Option<&Configuration> {
        self.configurations.iter().find(|c| c.name == name)
    }

    pub fn default_configuration(&self) -> Option<&Configuration> {
        self.configurations.first()
    }

    /// 将绑定到选项的输出文件名注入选项值，覆盖请求中提供的值
    pub fn bind_output_values(&self, values: &HashMap<String, String>) -> HashMap<String, String> {
        let mut bound = values.clone();
        for output in &self.outputs {
            if let OutputDeclaration::BoundOption { option, path } = output {
                bound.insert(option.clone(), path.clone());
            }
        }
        bound
    }

    /// 构建完整命令：可执行文件 + 按声明顺序渲染的选项
    pub fn build_command(
        &self,
        configuration: &Configuration,
        values: &HashMap<String, String>,
    ) -> Result<Vec<String>> {
        let values = self.bind_output_values(values);
        let mut command = configuration.bin.clone();
        command.extend(render_arguments(&self.options, &values)?);
        Ok(command)
    }

    /// 收集工作目录中所有声明的输出文件（绝对路径，去重）
    pub fn collect_outputs(&self, cwd: &Path) -> Vec<String> {
        let mut files = Vec::new();
        for output in &self.outputs {
            for path in output.collect(cwd) {
                let path = path.to_string_lossy().into_owned();
                if !files.contains(&path) {
                    files.push(path);
                }
            }
        }
        files
    }
}

/// 服务名称到服务描述的映射
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    services: HashMap<String, Arc<ServiceDescriptor>>,
}

impl ServiceCatalog {
    pub fn from_config(services: &[ServiceConfig]) -> Result<Self> {
        let mut catalog = Self::default();
        for service in services {
            catalog.insert(ServiceDescriptor::from_config(service)?);
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, descriptor: ServiceDescriptor) {
        self.services
            .insert(descriptor.name.clone(), Arc::new(descriptor));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ServiceDescriptor>> {
        self.services.get(name).cloned()
    }

    pub fn services(&self) -> impl Iterator<Item = &Arc<ServiceDescriptor>> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OptionConfig, OutputConfig};

    fn service_config() -> ServiceConfig {
        ServiceConfig {
            name: "aligner".into(),
            options: vec![
                OptionConfig {
                    name: "input".into(),
                    param: "-i $value".into(),
                    default: None,
                },
                OptionConfig {
                    name: "output".into(),
                    param: "-o $value".into(),
                    default: None,
                },
            ],
            outputs: vec![OutputConfig {
                path: Some("aligned.fa".into()),
                pattern: None,
                option: Some("output".into()),
            }],
            configurations: vec![ConfigurationConfig {
                name: "local".into(),
                executor: ExecutorKind::Shell,
                bin: "python align.py".into(),
                queue_args: vec![],
                env: BTreeMap::from([("TOOL_HOME".to_string(), "$$HOME/tool".to_string())]),
                limits: vec![],
                submit_command: None,
                status_command: None,
            }],
        }
    }

    #[test]
    fn test_build_command_injects_bound_output() {
        let descriptor = ServiceDescriptor::from_config(&service_config()).unwrap();
        let configuration = descriptor.default_configuration().unwrap();
        let values = HashMap::from([
            ("input".to_string(), "in.fa".to_string()),
            ("output".to_string(), "ignored.fa".to_string()),
        ]);

        let command = descriptor.build_command(configuration, &values).unwrap();
        assert_eq!(
            command,
            vec!["python", "align.py", "-i", "in.fa", "-o", "aligned.fa"]
        );
        assert_eq!(configuration.env["TOOL_HOME"], "$HOME/tool");
        assert_eq!(configuration.submit_command, "qsub");
    }

    #[test]
    fn test_collect_outputs_from_working_dir() {
        let descriptor = ServiceDescriptor::from_config(&service_config()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(descriptor.collect_outputs(dir.path()).is_empty());

        std::fs::write(dir.path().join("aligned.fa"), ">x").unwrap();
        let files = descriptor.collect_outputs(dir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("aligned.fa"));
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = ServiceCatalog::from_config(&[service_config()]).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("aligner").is_some());
        assert!(catalog.get("missing").is_none());
    }
}
