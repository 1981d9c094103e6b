use crate::ConfigArgs;
use crate::utils;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use tierflow_core::{PlannedInstance, ReadinessPolicy, Tier};

/// `--json` の出力
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidationReport<'a> {
    config_file: PathBuf,
    project_root: &'a PathBuf,
    start_port: u16,
    port_variable: &'a str,
    readiness: &'a ReadinessPolicy,
    tiers: &'a [Tier],
    ports: Vec<PlannedInstance>,
}

pub fn handle(args: &ConfigArgs, json: bool) -> anyhow::Result<()> {
    if !json {
        println!("{}", "設定を検証中...".blue());
    }

    let loaded = match utils::load_config(args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ 設定エラー".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };
    let config = &loaded.config;

    if json {
        let report = ValidationReport {
            config_file: loaded.path.clone(),
            project_root: &config.project_root,
            start_port: config.settings.start_port,
            port_variable: &config.settings.port_variable,
            readiness: &config.settings.readiness,
            tiers: &config.tiers,
            ports: config.port_plan(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    utils::print_loaded_config(&loaded);
    println!("{}", "✓ 設定ファイルは正常です！".green().bold());
    println!();
    println!("サマリー:");
    println!("  ティア: {}個", config.tiers.len());
    for tier in &config.tiers {
        let start = if tier.auto_start { "" } else { " (autoStart: false)" };
        println!(
            "    - {} ×{} ({}){}",
            tier.name.cyan(),
            tier.instances,
            utils::describe_runtime(tier),
            start
        );
        println!(
            "      {}",
            tier.working_dir(&config.project_root).display().to_string().dimmed()
        );
    }

    println!("  ポート割り当て:");
    for planned in config.port_plan() {
        println!(
            "    - {}#{} → localhost:{}",
            planned.tier, planned.index, planned.port
        );
    }

    if !config.settings.secrets.is_empty() {
        println!("  引き渡す環境変数: {}", config.settings.secrets.join(", "));
    }
    if !config.settings.build.is_empty() {
        println!("  ビルドコマンド: {}個", config.settings.build.len());
    }

    Ok(())
}
