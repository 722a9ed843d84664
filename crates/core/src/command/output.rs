use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::OutputConfig;
use crate::errors::{Result, SchedulerError};

/// 输出文件声明
#[derive(Debug, Clone)]
pub enum OutputDeclaration {
    /// 固定文件名
    Path(String),
    /// 文件名作为选项值传给命令
    BoundOption { option: String, path: String },
    /// 对工作目录内的文件名做正则匹配（从文件名开头匹配）
    Pattern(Regex),
}

impl OutputDeclaration {
    pub fn from_config(config: &OutputConfig) -> Result<Self> {
        match (&config.path, &config.pattern, &config.option) {
            (Some(path), None, None) => Ok(OutputDeclaration::Path(path.clone())),
            (Some(path), None, Some(option)) => Ok(OutputDeclaration::BoundOption {
                option: option.clone(),
                path: path.clone(),
            }),
            (None, Some(pattern), None) => {
                let regex = Regex::new(&format!("^(?:{pattern})")).map_err(|e| {
                    SchedulerError::Configuration(format!("无效的输出文件模式 {pattern}: {e}"))
                })?;
                Ok(OutputDeclaration::Pattern(regex))
            }
            _ => Err(SchedulerError::Configuration(
                "输出声明必须只包含 path（可选 option）或 pattern 其中之一".to_string(),
            )),
        }
    }

    /// 在工作目录中收集该声明匹配到的文件
    pub fn collect(&self, cwd: &Path) -> Vec<PathBuf> {
        match self {
            OutputDeclaration::Path(path) | OutputDeclaration::BoundOption { path, .. } => {
                let full = cwd.join(path);
                if full.exists() {
                    vec![full]
                } else {
                    Vec::new()
                }
            }
            OutputDeclaration::Pattern(regex) => {
                let Ok(entries) = fs::read_dir(cwd) else {
                    return Vec::new();
                };
                let mut matched: Vec<PathBuf> = entries
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| {
                        entry
                            .file_name()
                            .to_str()
                            .is_some_and(|name| regex.is_match(name))
                    })
                    .map(|entry| entry.path())
                    .collect();
                matched.sort();
                matched
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(path: Option<&str>, pattern: Option<&str>, option: Option<&str>) -> OutputConfig {
        OutputConfig {
            path: path.map(String::from),
            pattern: pattern.map(String::from),
            option: option.map(String::from),
        }
    }

    #[test]
    fn test_collect_fixed_and_pattern_outputs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("result.fa"), ">seq").unwrap();
        fs::write(dir.path().join("run.log"), "").unwrap();
        fs::write(dir.path().join("debug.log"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let fixed = OutputDeclaration::from_config(&output(Some("result.fa"), None, None)).unwrap();
        assert_eq!(fixed.collect(dir.path()), vec![dir.path().join("result.fa")]);

        let missing = OutputDeclaration::from_config(&output(Some("absent"), None, None)).unwrap();
        assert!(missing.collect(dir.path()).is_empty());

        let logs = OutputDeclaration::from_config(&output(None, Some(r".*\.log"), None)).unwrap();
        assert_eq!(
            logs.collect(dir.path()),
            vec![dir.path().join("debug.log"), dir.path().join("run.log")]
        );
    }

    #[test]
    fn test_pattern_is_anchored_at_start() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("xlog"), "").unwrap();
        let decl = OutputDeclaration::from_config(&output(None, Some("log"), None)).unwrap();
        assert!(decl.collect(dir.path()).is_empty());
    }

    #[test]
    fn test_invalid_declarations() {
        assert!(OutputDeclaration::from_config(&output(None, None, None)).is_err());
        assert!(OutputDeclaration::from_config(&output(Some("a"), Some("b"), None)).is_err());
        assert!(OutputDeclaration::from_config(&output(None, Some("("), None)).is_err());
    }
}
