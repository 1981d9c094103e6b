use crate::ConfigArgs;
use colored::Colorize;
use std::path::{Path, PathBuf};
use tierflow_core::{FleetConfig, Tier};

/// 読み込み済みの設定とその出どころ
pub struct LoadedConfig {
    pub path: PathBuf,
    pub config: FleetConfig,
}

/// 設定ファイルを探して読み込み、検証する
pub fn load_config(args: &ConfigArgs) -> anyhow::Result<LoadedConfig> {
    let path = match &args.config {
        Some(path) if path.exists() => path.clone(),
        Some(path) => {
            return Err(tierflow_config::ConfigError::ExplicitPathMissing(path.clone()).into());
        }
        None => tierflow_config::find_config_file()?,
    };

    let project_root = absolute(&tierflow_config::project_root_for(&path))?;
    let config = tierflow_core::load_fleet_file(&path, &project_root)?;
    tierflow_core::validate(&config)?;

    Ok(LoadedConfig { path, config })
}

/// 読み込んだ設定ファイルを表示
pub fn print_loaded_config(loaded: &LoadedConfig) {
    println!(
        "📄 設定ファイル: {}",
        loaded.path.display().to_string().cyan()
    );
    println!(
        "📁 プロジェクトルート: {}",
        loaded.config.project_root.display().to_string().cyan()
    );
}

/// ティアのディレクトリ（ランタイムのサブディレクトリを含まない）
pub fn tier_directories(config: &FleetConfig) -> Vec<PathBuf> {
    config
        .tiers
        .iter()
        .map(|t| config.project_root.join(&t.directory))
        .collect()
}

/// ランタイムの表示用文字列
pub fn describe_runtime(tier: &Tier) -> String {
    match &tier.command {
        Some(command) => format!("{}: {}", tier.runtime, command),
        None => tier.runtime.to_string(),
    }
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
