//! 扩展文件引导
//!
//! 首次使用时把示例扩展复制到用户扩展目录；已有文件时不做任何改动。

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::BridgeConfig;

/// 安装示例扩展时使用的文件名（不含后缀）
const EXTENSION_STEM: &str = "agent";

/// 查找用户扩展文件
///
/// 返回扩展目录中按文件名排序的第一个匹配文件。没有文件且 `install` 为 true 时，
/// 先复制示例扩展再查找。失败只记录日志。
pub fn extension_file(config: &BridgeConfig, install: bool) -> Option<PathBuf> {
    let dir = config.extension_dir();

    let found = find_extension(&dir, &config.extension_suffix);
    if found.is_some() || !install {
        return found;
    }

    match config.example_extension.as_deref() {
        Some(example) => {
            if let Err(e) = install_example(&dir, example, &config.extension_suffix) {
                tracing::error!("无法创建默认扩展: {:#}", e);
            }
        }
        None => tracing::debug!("未配置示例扩展，跳过安装"),
    }

    find_extension(&dir, &config.extension_suffix)
}

fn find_extension(dir: &Path, suffix: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(suffix))
        .collect();
    files.sort();
    files.into_iter().next()
}

fn install_example(dir: &Path, example: &Path, suffix: &str) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("创建扩展目录失败: {:?}", dir))?;

    let target = dir.join(format!("{}.{}", EXTENSION_STEM, suffix));

    // create_new：已有文件时不覆盖
    let mut file = match OpenOptions::new().write(true).create_new(true).open(&target) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("创建扩展文件失败: {:?}", target)),
    };

    let src = fs::read(example).with_context(|| format!("读取示例扩展失败: {:?}", example));
    let src = match src {
        Ok(s) => s,
        Err(e) => {
            // 不留下空文件
            drop(file);
            let _ = fs::remove_file(&target);
            return Err(e);
        }
    };
    file.write_all(&src)
        .with_context(|| format!("写入扩展文件失败: {:?}", target))?;

    tracing::info!("✅ 已安装示例扩展: {:?} -> {:?}", example, target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (BridgeConfig, TempDir) {
        let tmp = TempDir::new().unwrap();
        let example = tmp.path().join("example.go");
        fs::write(&example, "package agent // example").unwrap();
        let config = BridgeConfig::default()
            .with_data_dir(tmp.path().join("data"))
            .with_example_extension(&example);
        (config, tmp)
    }

    #[test]
    fn test_no_install_returns_none() {
        let (config, _tmp) = setup();
        assert!(extension_file(&config, false).is_none());
        assert!(!config.extension_dir().exists());
    }

    #[test]
    fn test_install_copies_example() {
        let (config, _tmp) = setup();
        let path = extension_file(&config, true).unwrap();
        assert_eq!(path, config.extension_dir().join("agent.go"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "package agent // example");
    }

    #[test]
    fn test_existing_file_untouched() {
        let (config, _tmp) = setup();
        let dir = config.extension_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("agent.go"), "package agent // mine").unwrap();

        let path = extension_file(&config, true).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "package agent // mine");
    }

    #[test]
    fn test_picks_first_sorted_match() {
        let (config, _tmp) = setup();
        let dir = config.extension_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("b.go"), "").unwrap();
        fs::write(dir.join("a.go"), "").unwrap();
        fs::write(dir.join("0.txt"), "").unwrap();

        assert_eq!(extension_file(&config, false).unwrap(), dir.join("a.go"));
    }

    #[test]
    fn test_missing_example_is_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let config = BridgeConfig::default()
            .with_data_dir(tmp.path())
            .with_example_extension(tmp.path().join("missing.go"));

        assert!(extension_file(&config, true).is_none());
        // 失败时不留下空文件
        assert!(!config.extension_dir().join("agent.go").exists());
    }
}
