use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("YAMLパースエラー: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO エラー: {}\n理由: {message}", .path.display())]
    IoError { path: PathBuf, message: String },

    #[error("無効な設定: {0}")]
    InvalidConfig(String),

    #[error("ティア '{tier}' の設定が不正です: {message}")]
    InvalidTier { tier: String, message: String },

    #[error("order に未定義のティアが含まれています: {0}")]
    UnknownTierInOrder(String),

    #[error("ティアが1つも定義されていません\nヒント: instances を持つトップレベルのキーがティアとして扱われます")]
    NoTiers,

    #[error(
        "環境変数 {0} が設定されていません\nヒント: orchestrator.secrets に列挙した変数はすべてのインスタンスへ引き渡されるため必須です"
    )]
    MissingSecret(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;
