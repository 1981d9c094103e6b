pub mod error;

pub use error::*;

use std::path::{Path, PathBuf};
use tracing::debug;

/// 設定ファイルを直接指定する環境変数
pub const CONFIG_ENV_VAR: &str = "TIERFLOW_CONFIG";

/// カレントディレクトリで探す設定ファイル名（優先順）
const CANDIDATES: [&str; 4] = [
    "config.local.yaml",
    ".config.local.yaml",
    "config.yaml",
    ".config.yaml",
];

/// フリート設定ファイルを探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 TIERFLOW_CONFIG (直接パス指定)
/// 2. カレントディレクトリ: config.local.yaml, .config.local.yaml, config.yaml, .config.yaml
/// 3. ./.tierflow/ ディレクトリ内: 同様の順序
/// 4. ~/.config/tierflow/config.yaml (グローバル設定)
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::ExplicitPathMissing(path));
    }

    let current_dir = std::env::current_dir()?;
    if let Some(path) = find_config_file_in(&current_dir) {
        return Ok(path);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("tierflow").join("config.yaml");
        if global_config.exists() {
            debug!(path = %global_config.display(), "Using global config");
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// 指定ディレクトリとその .tierflow/ 配下から設定ファイルを探す
pub fn find_config_file_in(dir: &Path) -> Option<PathBuf> {
    let search_dirs = [dir.to_path_buf(), dir.join(".tierflow")];

    for search_dir in search_dirs.iter().filter(|d| d.is_dir()) {
        for filename in &CANDIDATES {
            let path = search_dir.join(filename);
            if path.exists() {
                debug!(path = %path.display(), "Found config file");
                return Some(path);
            }
        }
    }

    None
}

/// 設定ファイルの位置からプロジェクトルートを決める
///
/// .tierflow/ 内の設定ファイルはその親ディレクトリをルートとする。
pub fn project_root_for(config_file: &Path) -> PathBuf {
    let parent = config_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    if parent.file_name().is_some_and(|n| n == ".tierflow") {
        parent
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or(parent)
    } else if parent.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        parent
    }
}
