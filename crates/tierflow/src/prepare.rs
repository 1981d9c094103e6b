//! 起動前の準備（共有ライブラリのビルドと出力ディレクトリの削除）

use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tierflow_core::BuildStep;
use tokio::process::Command;
use tracing::{debug, info};

/// ビルドコマンドを順番に実行する
///
/// 1つでも失敗したらそこで中断する。
pub async fn run_build_steps(project_root: &Path, steps: &[BuildStep]) -> anyhow::Result<()> {
    if steps.is_empty() {
        return Ok(());
    }

    println!();
    println!("{}", "🔨 共有ライブラリをビルド中...".blue());

    for step in steps {
        let dir = project_root.join(&step.directory);
        println!(
            "  → {} ({})",
            step.command.cyan(),
            step.directory.display()
        );
        info!(command = %step.command, dir = %dir.display(), "Running build step");

        let status = Command::new("sh")
            .arg("-c")
            .arg(&step.command)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "ビルドコマンドを実行できません: {} ({}): {}",
                    step.command,
                    dir.display(),
                    e
                )
            })?;

        if !status.success() {
            anyhow::bail!(
                "ビルドコマンドが失敗しました: {} ({})\n終了コード: {:?}",
                step.command,
                dir.display(),
                status.code()
            );
        }
        println!("  {} 完了", "✓".green());
    }

    Ok(())
}

/// 出力ディレクトリを削除し、削除したものを返す
pub fn clean_outputs(project_root: &Path, dirs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for dir in dirs {
        let path = project_root.join(dir);
        if !path.exists() {
            debug!(path = %path.display(), "Output directory not present");
            continue;
        }
        std::fs::remove_dir_all(&path).map_err(|e| {
            anyhow::anyhow!("{} を削除できません: {}", path.display(), e)
        })?;
        println!("  🧹 {} を削除しました", path.display().to_string().cyan());
        removed.push(path);
    }
    Ok(removed)
}
