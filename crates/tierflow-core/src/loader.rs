//! フリート設定ローダー
//!
//! YAMLの読み込み、ティアの抽出、起動順の解決、検証を行う

use crate::error::{FlowError, Result};
use crate::model::{FleetConfig, OrchestratorSettings, RuntimeKind, Tier, TierSpec};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// オーケストレーター設定のセクション名
const ORCHESTRATOR_KEY: &str = "orchestrator";

/// 設定ファイルを読み込んでFleetConfigを生成
#[instrument(skip(project_root), fields(path = %path.display()))]
pub fn load_fleet_file(path: &Path, project_root: &Path) -> Result<FleetConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| FlowError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let config = parse_fleet_yaml(&content, project_root)?;
    info!(tiers = config.tiers.len(), "Fleet config loaded");
    Ok(config)
}

/// YAML文字列からFleetConfigを生成
///
/// `instances` を持つトップレベルのマッピングをティアとして扱う。
/// それ以外のキーは各サービスの設定なので無視する。
pub fn parse_fleet_yaml(content: &str, project_root: &Path) -> Result<FleetConfig> {
    let document: Value = serde_yaml::from_str(content)?;
    let mapping = match document {
        Value::Mapping(m) => m,
        Value::Null => Mapping::new(),
        _ => {
            return Err(FlowError::InvalidConfig(
                "トップレベルはマッピングである必要があります".to_string(),
            ));
        }
    };

    let mut settings = OrchestratorSettings::default();
    let mut tiers = Vec::new();

    for (key, value) in mapping {
        let Some(name) = key.as_str() else {
            continue;
        };

        if name == ORCHESTRATOR_KEY {
            settings = serde_yaml::from_value(value)?;
            continue;
        }

        if !is_tier_section(&value) {
            debug!(key = name, "Skipping non-tier section");
            continue;
        }

        let spec: TierSpec =
            serde_yaml::from_value(value).map_err(|e| FlowError::InvalidTier {
                tier: name.to_string(),
                message: e.to_string(),
            })?;
        tiers.push(Tier::from_spec(name, spec, project_root));
    }

    let tiers = apply_order(tiers, settings.order.as_deref())?;

    let config = FleetConfig {
        project_root: project_root.to_path_buf(),
        settings,
        tiers,
    };
    validate(&config)?;
    Ok(config)
}

fn is_tier_section(value: &Value) -> bool {
    value
        .as_mapping()
        .is_some_and(|m| m.contains_key("instances"))
}

/// `order` に従ってティアを並べ替える
///
/// `order` を指定する場合はすべてのティアを列挙する必要がある。
fn apply_order(tiers: Vec<Tier>, order: Option<&[String]>) -> Result<Vec<Tier>> {
    let Some(order) = order else {
        return Ok(tiers);
    };

    let mut by_name: BTreeMap<String, Tier> =
        tiers.into_iter().map(|t| (t.name.clone(), t)).collect();

    let mut ordered = Vec::with_capacity(order.len());
    for name in order {
        let tier = by_name
            .remove(name)
            .ok_or_else(|| FlowError::UnknownTierInOrder(name.clone()))?;
        ordered.push(tier);
    }

    if !by_name.is_empty() {
        let missing: Vec<_> = by_name.keys().map(String::as_str).collect();
        return Err(FlowError::InvalidConfig(format!(
            "order に含まれていないティアがあります: {}",
            missing.join(", ")
        )));
    }

    Ok(ordered)
}

/// 設定の整合性を検証
pub fn validate(config: &FleetConfig) -> Result<()> {
    if config.tiers.is_empty() {
        return Err(FlowError::NoTiers);
    }

    if config.settings.start_port == 0 {
        return Err(FlowError::InvalidConfig(
            "startPort に 0 は指定できません".to_string(),
        ));
    }

    if config.settings.port_variable.trim().is_empty() {
        return Err(FlowError::InvalidConfig(
            "portVariable が空です".to_string(),
        ));
    }

    for tier in &config.tiers {
        if tier.runtime == RuntimeKind::Shell && tier.command.is_none() {
            return Err(FlowError::InvalidTier {
                tier: tier.name.clone(),
                message: "runtime: shell には command が必要です".to_string(),
            });
        }
        if tier.instances == 0 && tier.auto_start {
            warn!(tier = %tier.name, "Tier has zero instances");
        }
    }

    let total: usize = config.auto_start_tiers().map(|t| t.instances).sum();
    let last_port = usize::from(config.settings.start_port) + total;
    if total > 0 && last_port - 1 > usize::from(u16::MAX) {
        return Err(FlowError::InvalidConfig(format!(
            "{} 個のインスタンスにはポート {} 以降が足りません",
            total, config.settings.start_port
        )));
    }

    Ok(())
}

/// 秘匿値の環境変数を現在の環境から集める
///
/// 1つでも欠けていればエラー（プロセス起動前に検出する）。
pub fn collect_secrets(settings: &OrchestratorSettings) -> Result<BTreeMap<String, String>> {
    settings
        .secrets
        .iter()
        .map(|name| {
            std::env::var(name)
                .map(|value| (name.clone(), value))
                .map_err(|_| FlowError::MissingSecret(name.clone()))
        })
        .collect()
}
