use std::collections::HashMap;
use std::sync::Arc;

use bioqueue_core::{ExecutorKind, SchedulerConfig, ServiceCatalog};
use tracing::info;

use crate::executors::{create_executor, Executor};

/// (服务名, 执行配置名) 到执行器的映射，启动时构建后只读
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<(String, String), Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为目录中每个服务的每个执行配置创建执行器
    pub fn from_catalog(catalog: &ServiceCatalog, config: &SchedulerConfig) -> Self {
        let mut registry = Self::new();
        for service in catalog.services() {
            for configuration in &service.configurations {
                registry.insert(create_executor(
                    service.clone(),
                    configuration.clone(),
                    config,
                ));
            }
        }
        info!("已创建 {} 个执行器", registry.len());
        registry
    }

    pub fn insert(&mut self, executor: Arc<dyn Executor>) {
        let key = (
            executor.service().name.clone(),
            executor.configuration().name.clone(),
        );
        self.executors.insert(key, executor);
    }

    pub fn get(&self, service: &str, configuration: &str) -> Option<Arc<dyn Executor>> {
        self.executors
            .get(&(service.to_string(), configuration.to_string()))
            .cloned()
    }

    pub fn uses_kind(&self, kind: ExecutorKind) -> bool {
        self.executors.values().any(|executor| executor.kind() == kind)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bioqueue_testing_utils::ServiceConfigBuilder;

    #[test]
    fn test_one_executor_per_configuration() {
        let services = vec![
            ServiceConfigBuilder::new("echo")
                .with_configuration("local", ExecutorKind::Shell, "echo")
                .with_configuration("remote", ExecutorKind::Queue, "echo")
                .build(),
            ServiceConfigBuilder::new("blast")
                .with_configuration("grid", ExecutorKind::GridEngine, "blastp")
                .build(),
        ];
        let catalog = ServiceCatalog::from_config(&services).unwrap();
        let registry = ExecutorRegistry::from_catalog(&catalog, &SchedulerConfig::default());

        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.get("echo", "remote").unwrap().kind(),
            ExecutorKind::Queue
        );
        assert!(registry.get("echo", "grid").is_none());
        assert!(registry.uses_kind(ExecutorKind::GridEngine));
        assert!(!registry.uses_kind(ExecutorKind::Cluster));
    }
}
