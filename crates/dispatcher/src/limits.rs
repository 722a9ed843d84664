use std::collections::HashMap;

use bioqueue_core::config::LimitRule;
use bioqueue_core::{Configuration, ServiceDescriptor};
use tracing::debug;

/// 执行配置选择策略
pub trait ConfigurationSelector: Send + Sync {
    /// 为给定的选项值挑选执行配置，没有可用配置时返回 None
    fn select<'a>(
        &self,
        service: &'a ServiceDescriptor,
        values: &HashMap<String, String>,
    ) -> Option<&'a Configuration>;

    fn name(&self) -> &str;
}

/// 按声明顺序返回第一个满足全部限制规则的配置
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstMatchSelector;

impl FirstMatchSelector {
    pub fn new() -> Self {
        Self
    }
}

impl ConfigurationSelector for FirstMatchSelector {
    fn select<'a>(
        &self,
        service: &'a ServiceDescriptor,
        values: &HashMap<String, String>,
    ) -> Option<&'a Configuration> {
        let selected = service.configurations.iter().find(|configuration| {
            configuration
                .limits
                .iter()
                .all(|rule| rule_holds(rule, service, values))
        });
        match selected {
            Some(configuration) => debug!(
                "服务 {} 选择执行配置: {}",
                service.name, configuration.name
            ),
            None => debug!("服务 {} 没有满足限制的执行配置", service.name),
        }
        selected
    }

    fn name(&self) -> &str {
        "FirstMatch"
    }
}

/// 选项值优先取请求中的值，其次取选项默认值
fn option_value<'a>(
    service: &'a ServiceDescriptor,
    values: &'a HashMap<String, String>,
    name: &str,
) -> Option<&'a str> {
    values.get(name).map(String::as_str).or_else(|| {
        service
            .options
            .iter()
            .find(|option| option.name == name)
            .and_then(|option| option.default.as_deref())
    })
}

/// 缺失的值不满足任何规则
fn rule_holds(rule: &LimitRule, service: &ServiceDescriptor, values: &HashMap<String, String>) -> bool {
    let Some(value) = option_value(service, values, &rule.option) else {
        return false;
    };

    if rule.min.is_some() || rule.max.is_some() {
        let Ok(number) = value.trim().parse::<f64>() else {
            return false;
        };
        if rule.min.is_some_and(|min| number < min) || rule.max.is_some_and(|max| number > max) {
            return false;
        }
    }
    if rule
        .max_length
        .is_some_and(|limit| value.chars().count() > limit)
    {
        return false;
    }
    if let Some(allowed) = &rule.one_of {
        if !allowed.iter().any(|candidate| candidate == value) {
            return false;
        }
    }
    true
}
