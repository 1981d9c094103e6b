use crate::UpArgs;
use crate::prepare;
use crate::utils;
use colored::Colorize;
use tierflow_core::FleetConfig;
use tierflow_process::{
    FleetOutcome, FleetSupervisor, HttpHealthCheck, InstanceEnvironment, ReadinessProbe,
    describe_exit_code, sweep_stale_processes,
};
use tracing::warn;

/// コマンドラインの指定で設定を上書きする
fn apply_overrides(config: &mut FleetConfig, args: &UpArgs) {
    if let Some(port) = args.start_port {
        config.settings.start_port = port;
    }
    if let Some(secs) = args.probe_timeout_secs {
        config.settings.readiness.timeout_ms = Some(secs.saturating_mul(1000));
    }
    if let Some(max) = args.max_attempts {
        config.settings.readiness.max_attempts = Some(max);
    }
}

/// 起動してから全インスタンスの終了（または中断）までを実行し、終了コードを返す
pub async fn handle(args: UpArgs) -> anyhow::Result<i32> {
    let mut loaded = utils::load_config(&args.config)?;
    apply_overrides(&mut loaded.config, &args);
    // 上書き後の値で再検証する
    tierflow_core::validate(&loaded.config)?;
    let config = &loaded.config;

    // 秘匿値はプロセスを1つも起動しないうちに確認する
    let secrets = tierflow_core::collect_secrets(&config.settings)?;

    utils::print_loaded_config(&loaded);

    if !args.no_sweep {
        match sweep_stale_processes(&utils::tier_directories(config), &config.project_root).await {
            Ok(stale) if !stale.is_empty() => {
                println!(
                    "{}",
                    format!("🧹 前回の残存プロセスを {} 個停止しました", stale.len()).yellow()
                );
            }
            Ok(_) => {}
            Err(e) => warn!("Skipping stale process sweep: {}", e),
        }
    }

    if !args.skip_build {
        prepare::run_build_steps(&config.project_root, &config.settings.build).await?;
    }
    if !args.keep_output {
        prepare::clean_outputs(&config.project_root, &config.settings.cleanup)?;
    }

    print_plan(config);

    let probe = ReadinessProbe::new(
        HttpHealthCheck::new(config.settings.readiness.clone())?,
        config.settings.readiness.clone(),
    );
    let environment = InstanceEnvironment::new(config.settings.port_variable.clone(), secrets);
    let mut supervisor = FleetSupervisor::new(
        probe,
        environment,
        config.project_root.clone(),
        config.settings.start_port,
    )
    .with_port_reclaim(args.reclaim_ports);

    println!();
    println!("{}", "🚀 フリートを起動中...".blue());
    let outcome = supervisor.run(&config.tiers).await;
    print_outcome(&outcome);

    Ok(outcome.exit_code)
}

fn print_plan(config: &FleetConfig) {
    println!();
    println!(
        "{}",
        format!("ティア一覧 ({} 個):", config.tiers.len()).bold()
    );
    let plan = config.port_plan();
    for tier in &config.tiers {
        if !tier.auto_start {
            println!(
                "  • {} {}",
                tier.name.cyan(),
                "(autoStart: false のためスキップ)".dimmed()
            );
            continue;
        }
        let ports: Vec<String> = plan
            .iter()
            .filter(|p| p.tier == tier.name)
            .map(|p| p.port.to_string())
            .collect();
        println!(
            "  • {} ×{} [{}] ポート: {}",
            tier.name.cyan(),
            tier.instances,
            utils::describe_runtime(tier),
            if ports.is_empty() {
                "-".to_string()
            } else {
                ports.join(", ")
            }
        );
    }
}

fn print_outcome(outcome: &FleetOutcome) {
    println!();
    for exit in outcome.exits.iter().filter(|e| !e.succeeded()) {
        println!(
            "  {} {}#{} (localhost:{}): {}",
            "⚠".yellow(),
            exit.tier,
            exit.index,
            exit.port,
            describe_exit_code(&exit.exit_code)
        );
    }

    match &outcome.error {
        None => {
            println!(
                "{}",
                format!(
                    "✓ 全インスタンスが終了しました（{} 個）",
                    outcome.exits.len()
                )
                .green()
                .bold()
            );
        }
        Some(e) => {
            eprintln!("{}", "✗ フリートを中断しました".red().bold());
            eprintln!("  {}", e);
            if outcome.teardown.killed > 0 {
                eprintln!(
                    "  停止したインスタンス: {} 個（子プロセス {} 個）",
                    outcome.teardown.killed, outcome.teardown.descendants
                );
            }
            for err in &outcome.teardown.errors {
                eprintln!("  {} {}", "⚠".yellow(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigArgs;

    fn args() -> UpArgs {
        UpArgs {
            config: ConfigArgs { config: None },
            start_port: None,
            probe_timeout_secs: None,
            max_attempts: None,
            reclaim_ports: false,
            skip_build: false,
            keep_output: false,
            no_sweep: false,
        }
    }

    #[test]
    fn test_overrides() {
        let mut config =
            tierflow_core::parse_fleet_yaml("collector:\n  instances: 1\n", std::path::Path::new("."))
                .unwrap();

        apply_overrides(
            &mut config,
            &UpArgs {
                start_port: Some(9000),
                probe_timeout_secs: Some(30),
                max_attempts: Some(10),
                ..args()
            },
        );

        assert_eq!(config.settings.start_port, 9000);
        assert_eq!(config.settings.readiness.timeout_ms, Some(30_000));
        assert_eq!(config.settings.readiness.max_attempts, Some(10));
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let mut config = tierflow_core::parse_fleet_yaml(
            "orchestrator:\n  startPort: 7800\ncollector:\n  instances: 1\n",
            std::path::Path::new("."),
        )
        .unwrap();

        apply_overrides(&mut config, &args());

        assert_eq!(config.settings.start_port, 7800);
        assert!(config.settings.readiness.timeout_ms.is_none());
    }
}
