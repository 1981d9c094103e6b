use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "設定ファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: config.local.yaml, config.yaml\n\
        - ./.tierflow/ ディレクトリ\n\
        - ~/.config/tierflow/config.yaml\n\
        または TIERFLOW_CONFIG 環境変数で直接指定できます"
    )]
    ConfigFileNotFound,

    #[error("TIERFLOW_CONFIG で指定された設定ファイルが存在しません: {}", .0.display())]
    ExplicitPathMissing(PathBuf),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
