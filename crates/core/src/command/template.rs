use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::errors::{Result, SchedulerError};

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$(?:(\$)|\{([_A-Za-z][_A-Za-z0-9]*)\}|([_A-Za-z][_A-Za-z0-9]*))")
            .expect("placeholder pattern is valid")
    })
}

/// 逐个替换 `$name`、`${name}` 占位符，`$$` 转义为 `$`
fn replace_placeholders<F>(template: &str, mut resolve: F) -> String
where
    F: FnMut(&str, &str) -> String,
{
    placeholder_regex()
        .replace_all(template, |caps: &Captures<'_>| {
            if caps.get(1).is_some() {
                return "$".to_string();
            }
            let name = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            resolve(name, &caps[0])
        })
        .into_owned()
}

/// 将选项模板中的 `$value` / `${value}` 替换为已转义的值
///
/// 模板中出现其他占位符名称视为配置错误。
pub fn render_template(template: &str, value: &str) -> Result<String> {
    let mut unknown = None;
    let rendered = replace_placeholders(template, |name, original| {
        if name == "value" {
            value.to_string()
        } else {
            unknown.get_or_insert_with(|| name.to_string());
            original.to_string()
        }
    });
    match unknown {
        Some(name) => Err(SchedulerError::Command(format!(
            "选项模板包含未知占位符 ${name}: {template}"
        ))),
        None => Ok(rendered),
    }
}

/// 环境变量插值，未定义的变量原样保留
pub fn expand_env<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    replace_placeholders(text, |name, original| {
        lookup(name).unwrap_or_else(|| original.to_string())
    })
}
