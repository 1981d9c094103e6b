mod commands;
mod prepare;
mod utils;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tier")]
#[command(about = "ティアごとに起動し、準備完了を待ち、失敗したらまとめて止める。", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// フリートを起動して終了まで監視
    Up(UpArgs),
    /// 設定を検証し、ポート割り当てを表示
    Validate {
        #[command(flatten)]
        config: ConfigArgs,
        /// JSON で出力
        #[arg(long)]
        json: bool,
    },
    /// 前回実行の残存プロセスを停止
    Sweep {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// バージョン情報を表示
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// 設定ファイルのパス（TIERFLOW_CONFIG 環境変数）
    #[arg(short, long, env = "TIERFLOW_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct UpArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// 最初のインスタンスのポート（TIERFLOW_START_PORT 環境変数）
    #[arg(long, env = "TIERFLOW_START_PORT")]
    pub start_port: Option<u16>,
    /// ティアごとの準備完了待機の上限（秒）
    #[arg(long)]
    pub probe_timeout_secs: Option<u64>,
    /// インスタンスごとのヘルスチェック失敗回数の上限
    #[arg(long)]
    pub max_attempts: Option<u32>,
    /// 割り当て前にポートを占有しているプロセスを停止する
    #[arg(long)]
    pub reclaim_ports: bool,
    /// ビルドコマンドを実行しない
    #[arg(long)]
    pub skip_build: bool,
    /// 出力ディレクトリを削除しない
    #[arg(long)]
    pub keep_output: bool,
    /// 残存プロセスの停止を行わない
    #[arg(long)]
    pub no_sweep: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ログは stderr に出力（stdout は結果表示用）
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Up(args) => {
            let code = commands::up::handle(args).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Validate { config, json } => {
            commands::validate::handle(&config, json)?;
        }
        Commands::Sweep { config } => {
            commands::sweep::handle(&config).await?;
        }
        Commands::Version => {
            println!("tierflow {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
