use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(
        "ティア '{tier}' のインスタンス #{index} を起動できません: {reason}\n作業ディレクトリ: {}\n\nヒント:\n  • ディレクトリが存在するか確認してください\n  • npm / cargo が PATH 上にあるか確認してください",
        .working_dir.display()
    )]
    LaunchFailed {
        tier: String,
        index: usize,
        working_dir: PathBuf,
        reason: String,
    },

    #[error(
        "インスタンス localhost:{port}（ティア '{tier}'）が準備完了前に終了しました: {}",
        describe_exit_code(.exit_code)
    )]
    InstanceExited {
        tier: String,
        port: u16,
        exit_code: Option<i32>,
    },

    #[error(
        "インスタンス localhost:{port}（ティア '{tier}'）の準備完了を待機中にタイムアウトしました（{attempts}回失敗）\n\nヒント:\n  • サービスのログを確認してください\n  • readiness.maxAttempts / readiness.timeoutMs を増やしてみてください"
    )]
    ProbeTimeout {
        tier: String,
        port: u16,
        attempts: u32,
    },

    #[error("割り当て可能なポートがありません（次のポート: {next}）")]
    PortRangeExhausted { next: u32 },

    #[error("プロセス {pid} の停止に失敗しました: {reason}")]
    Teardown { pid: u32, reason: String },

    #[error("{signal} を受信したため中断しました")]
    Interrupted { signal: String },

    #[error("ランタイム '{0}' に対応するランチャーが登録されていません")]
    LauncherNotFound(String),

    #[error("/proc の走査に失敗しました ({}): {reason}", .path.display())]
    ProcScan { path: PathBuf, reason: String },

    #[error("設定エラー: {0}")]
    ConfigError(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// 終了時のプロセス終了コード
    pub fn exit_code(&self) -> i32 {
        match self {
            ProcessError::Interrupted { .. } => 130,
            _ => 1,
        }
    }
}

/// 終了コードを表示用に整形（シグナル終了はコードを持たない）
pub fn describe_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "シグナルで終了".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, ProcessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_exited_message() {
        let err = ProcessError::InstanceExited {
            tier: "collector".to_string(),
            port: 7701,
            exit_code: Some(1),
        };
        let message = err.to_string();
        assert!(message.contains("localhost:7701"));
        assert!(message.contains("collector"));
        assert!(message.contains("exit code 1"));
    }

    #[test]
    fn test_signal_exit_message() {
        let err = ProcessError::InstanceExited {
            tier: "finder".to_string(),
            port: 7705,
            exit_code: None,
        };
        assert!(err.to_string().contains("シグナル"));
    }

    #[test]
    fn test_exit_codes() {
        let interrupted = ProcessError::Interrupted {
            signal: "SIGINT".to_string(),
        };
        assert_eq!(interrupted.exit_code(), 130);

        let timeout = ProcessError::ProbeTimeout {
            tier: "generator".to_string(),
            port: 7703,
            attempts: 5,
        };
        assert_eq!(timeout.exit_code(), 1);
    }
}
