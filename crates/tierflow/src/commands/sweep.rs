use crate::ConfigArgs;
use crate::utils;
use colored::Colorize;

pub async fn handle(args: &ConfigArgs) -> anyhow::Result<()> {
    let loaded = utils::load_config(args)?;
    let root = &loaded.config.project_root;
    let dirs = tierflow_process::sweep_targets(&utils::tier_directories(&loaded.config), root);

    println!("{}", "残存プロセスを検索中...".blue());
    for dir in &dirs {
        println!("  • {}", dir.display().to_string().cyan());
    }

    let stopped = tierflow_process::sweep_stale_processes(&dirs, root).await?;
    if stopped.is_empty() {
        println!("{}", "✓ 残存プロセスはありません".green());
        return Ok(());
    }

    for process in &stopped {
        println!(
            "  {} pid {} {} ({})",
            "✓".green(),
            process.pid,
            process.program,
            process.cwd.display()
        );
    }
    println!(
        "{}",
        format!("{} 個のプロセスを停止しました", stopped.len())
            .green()
            .bold()
    );
    Ok(())
}
