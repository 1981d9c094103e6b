//! データモデル定義

mod readiness;
mod tier;

pub use readiness::*;
pub use tier::*;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// インスタンスへポートを渡す環境変数のデフォルト名
pub const DEFAULT_PORT_VARIABLE: &str = "SERVICE_HTTP_PORT";

/// インスタンス番号を渡す環境変数名
pub const INSTANCE_INDEX_VARIABLE: &str = "INSTANCE_INDEX";

/// 起動前に実行するビルドコマンド
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStep {
    pub directory: PathBuf,
    pub command: String,
}

/// `orchestrator` セクション
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorSettings {
    /// 最初のインスタンスに割り当てるポート
    #[serde(default = "default_start_port")]
    pub start_port: u16,
    /// ティアの起動順（未指定ならドキュメント順）
    #[serde(default)]
    pub order: Option<Vec<String>>,
    #[serde(default = "default_port_variable")]
    pub port_variable: String,
    /// そのまま引き渡す秘匿値の環境変数名
    #[serde(default)]
    pub secrets: Vec<String>,
    #[serde(default)]
    pub readiness: ReadinessPolicy,
    #[serde(default)]
    pub build: Vec<BuildStep>,
    /// 起動前に削除する出力ディレクトリ
    #[serde(default)]
    pub cleanup: Vec<PathBuf>,
}

fn default_start_port() -> u16 {
    7700
}
fn default_port_variable() -> String {
    DEFAULT_PORT_VARIABLE.to_string()
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            start_port: default_start_port(),
            order: None,
            port_variable: default_port_variable(),
            secrets: Vec::new(),
            readiness: ReadinessPolicy::default(),
            build: Vec::new(),
            cleanup: Vec::new(),
        }
    }
}

/// 1インスタンス分のポート割り当て予定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedInstance {
    pub tier: String,
    pub index: usize,
    pub port: u16,
}

/// 読み込み済みのフリート設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    pub project_root: PathBuf,
    pub settings: OrchestratorSettings,
    /// 起動順に並んだティア
    pub tiers: Vec<Tier>,
}

impl FleetConfig {
    /// 自動起動対象のティア
    pub fn auto_start_tiers(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.iter().filter(|t| t.auto_start)
    }

    /// 起動時に割り当てられるポートの予定表
    ///
    /// 自動起動しないティアはポートを消費しない。
    pub fn port_plan(&self) -> Vec<PlannedInstance> {
        let mut next = u32::from(self.settings.start_port);
        let mut plan = Vec::new();
        for tier in self.auto_start_tiers() {
            for index in 0..tier.instances {
                let Ok(port) = u16::try_from(next) else {
                    return plan;
                };
                plan.push(PlannedInstance {
                    tier: tier.name.clone(),
                    index,
                    port,
                });
                next += 1;
            }
        }
        plan
    }
}
