use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use bioqueue_core::{
    Configuration, ProcessOutput, SchedulerError, SchedulerResult, ServiceCatalog,
    ServiceDescriptor,
};
use tracing::{debug, info};

use crate::job::Runnable;

/// 在本机工作目录中运行的服务命令
#[derive(Debug, Clone)]
pub struct LocalCommand {
    service: Arc<ServiceDescriptor>,
    argv: Vec<String>,
    env: Vec<(String, String)>,
    cwd: PathBuf,
}

impl LocalCommand {
    /// 构建命令；选项渲染失败时立即返回错误
    pub fn new(
        service: Arc<ServiceDescriptor>,
        configuration: &Configuration,
        values: &HashMap<String, String>,
        cwd: PathBuf,
    ) -> SchedulerResult<Self> {
        let argv = service.build_command(configuration, values)?;
        let env = configuration
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self {
            service,
            argv,
            env,
            cwd,
        })
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }
}

impl Runnable for LocalCommand {
    fn run(&self) -> SchedulerResult<ProcessOutput> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| SchedulerError::Command("命令为空".to_string()))?;
        std::fs::create_dir_all(&self.cwd)?;

        let output = Command::new(program)
            .args(args)
            .current_dir(&self.cwd)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .map_err(|e| SchedulerError::Command(format!("启动命令 {program} 失败: {e}")))?;

        debug!(
            service = %self.service.name,
            return_code = ?output.status.code(),
            "命令执行结束"
        );
        Ok(ProcessOutput {
            return_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            files: self.service.collect_outputs(&self.cwd),
        })
    }

    fn describe(&self) -> String {
        self.argv.join(" ")
    }
}

/// 根据 `NEW TASK` 请求构建本地命令
#[derive(Debug, Clone)]
pub struct CommandFactory {
    catalog: Arc<ServiceCatalog>,
    work_dir: PathBuf,
}

impl CommandFactory {
    pub fn new(catalog: Arc<ServiceCatalog>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            work_dir: work_dir.into(),
        }
    }

    /// `cwd` 缺省时在工作根目录下使用作业ID作为子目录
    pub fn create(
        &self,
        job_id: &str,
        service: &str,
        configuration: Option<&str>,
        values: &HashMap<String, String>,
        cwd: Option<&str>,
    ) -> SchedulerResult<LocalCommand> {
        let descriptor = self
            .catalog
            .get(service)
            .ok_or_else(|| SchedulerError::ServiceNotFound {
                name: service.to_string(),
            })?;
        let chosen = match configuration {
            Some(name) => descriptor.configuration(name),
            None => descriptor.default_configuration(),
        }
        .cloned()
        .ok_or_else(|| {
            SchedulerError::Configuration(format!(
                "服务 {service} 没有执行配置 {}",
                configuration.unwrap_or("<default>")
            ))
        })?;

        let cwd = match cwd {
            Some(dir) => PathBuf::from(dir),
            None => self.work_dir.join(job_id),
        };
        let command = LocalCommand::new(descriptor, &chosen, values, cwd)?;
        info!(job_id, service, command = %command.describe(), "构建本地命令");
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bioqueue_core::{ConfigurationConfig, ExecutorKind, OptionConfig, OutputConfig, ServiceConfig};

    fn catalog() -> Arc<ServiceCatalog> {
        let config = ServiceConfig {
            name: "echo".into(),
            options: vec![OptionConfig {
                name: "alpha".into(),
                param: "-a=${value}".into(),
                default: None,
            }],
            outputs: vec![OutputConfig {
                path: Some("out.txt".into()),
                pattern: None,
                option: None,
            }],
            configurations: vec![ConfigurationConfig {
                name: "local".into(),
                executor: ExecutorKind::Shell,
                bin: "sh -c 'echo \"$0\" > out.txt; echo \"$0\"'".into(),
                queue_args: vec![],
                env: Default::default(),
                limits: vec![],
                submit_command: None,
                status_command: None,
            }],
        };
        Arc::new(ServiceCatalog::from_config(&[config]).unwrap())
    }

    #[test]
    fn test_unknown_service_is_rejected() {
        let factory = CommandFactory::new(catalog(), "/tmp");
        let err = factory
            .create("j", "missing", None, &HashMap::new(), None)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ServiceNotFound { .. }));

        let err = factory
            .create("j", "echo", Some("grid"), &HashMap::new(), None)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Configuration(_)));
    }

    #[test]
    fn test_default_cwd_is_under_work_dir() {
        let factory = CommandFactory::new(catalog(), "/srv/work");
        let command = factory
            .create("job-1", "echo", None, &HashMap::new(), None)
            .unwrap();
        assert_eq!(command.cwd(), Path::new("/srv/work/job-1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_collects_output_files() {
        let dir = tempfile::tempdir().unwrap();
        let factory = CommandFactory::new(catalog(), dir.path());
        let values = HashMap::from([("alpha".to_string(), "foo bar".to_string())]);
        let command = factory.create("job-2", "echo", None, &values, None).unwrap();
        assert_eq!(command.argv().last().unwrap(), "-a=foo bar");

        let output = command.run().unwrap();
        assert_eq!(output.return_code, Some(0));
        assert_eq!(output.stdout, "-a=foo bar\n");
        assert_eq!(output.files.len(), 1);
        assert!(output.files[0].ends_with("job-2/out.txt"));
    }
}
