use std::collections::HashMap;

use crate::config::OptionConfig;
use crate::errors::{Result, SchedulerError};

use super::template::render_template;

/// 命令行选项描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOption {
    pub name: String,
    pub param: String,
    pub default: Option<String>,
}

impl CommandOption {
    pub fn new(name: impl Into<String>, param: impl Into<String>, default: Option<String>) -> Self {
        Self {
            name: name.into(),
            param: param.into(),
            default,
        }
    }

    /// 渲染单个选项
    ///
    /// 没有值也没有默认值时返回 `None`，不产生任何参数。
    /// 值在代入模板前按 shell 规则转义，因此整个值始终作为一个单元被代入。
    pub fn render(&self, value: Option<&str>) -> Result<Option<String>> {
        let Some(value) = value.or(self.default.as_deref()) else {
            return Ok(None);
        };
        let quoted = shlex::try_quote(value).map_err(|e| {
            SchedulerError::Command(format!("选项 {} 的值无法转义: {e}", self.name))
        })?;
        let rendered = render_template(&self.param, &quoted)?;
        if rendered.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(rendered))
    }
}

impl From<&OptionConfig> for CommandOption {
    fn from(config: &OptionConfig) -> Self {
        Self::new(config.name.clone(), config.param.clone(), config.default.clone())
    }
}

/// 按声明顺序渲染所有选项并按 shell 规则切分为参数列表
pub fn render_arguments(
    options: &[CommandOption],
    values: &HashMap<String, String>,
) -> Result<Vec<String>> {
    let mut arguments = Vec::new();
    for option in options {
        let Some(rendered) = option.render(values.get(&option.name).map(String::as_str))? else {
            continue;
        };
        let tokens = shlex::split(&rendered).ok_or_else(|| {
            SchedulerError::Command(format!("选项 {} 渲染结果无法切分: {rendered}", option.name))
        })?;
        arguments.extend(tokens);
    }
    Ok(arguments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_value_with_space_stays_one_token() {
        let options = vec![CommandOption::new("alpha", "-a=${value}", None)];
        let args = render_arguments(&options, &values(&[("alpha", "foo bar")])).unwrap();
        assert_eq!(args, vec!["-a=foo bar".to_string()]);
    }

    #[test]
    fn test_missing_value_without_default_is_dropped() {
        let options = vec![
            CommandOption::new("alpha", "-a ${value}", None),
            CommandOption::new("beta", "-b", Some("on".into())),
        ];
        let args = render_arguments(&options, &HashMap::new()).unwrap();
        assert_eq!(args, vec!["-b".to_string()]);
    }

    #[test]
    fn test_template_whitespace_splits_into_tokens() {
        let options = vec![CommandOption::new("input", "--in $value --format fasta", None)];
        let args = render_arguments(&options, &values(&[("input", "seq one.fa")])).unwrap();
        assert_eq!(args, vec!["--in", "seq one.fa", "--format", "fasta"]);
    }

    #[test]
    fn test_default_used_when_value_absent() {
        let option = CommandOption::new("gap", "--gap=$value", Some("5".into()));
        assert_eq!(option.render(None).unwrap().as_deref(), Some("--gap=5"));
        assert_eq!(option.render(Some("7")).unwrap().as_deref(), Some("--gap=7"));
    }

    #[test]
    fn test_shell_metacharacters_are_not_interpreted() {
        let options = vec![CommandOption::new("q", "$value", None)];
        let args = render_arguments(&options, &values(&[("q", "a; rm -rf 'x'")])).unwrap();
        assert_eq!(args, vec!["a; rm -rf 'x'".to_string()]);
    }
}
