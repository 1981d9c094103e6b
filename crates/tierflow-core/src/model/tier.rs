//! ティア定義

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// インスタンスの起動方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// `npm start`（デフォルト）
    #[default]
    #[serde(rename = "nodejs", alias = "node")]
    Node,
    /// `cargo run --release`
    Rust,
    /// 任意のシェルコマンド（`command` が必須）
    #[serde(alias = "sh")]
    Shell,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "nodejs",
            Self::Rust => "rust",
            Self::Shell => "shell",
        }
    }

    /// ティアディレクトリ配下の実行ディレクトリ名
    fn subdirectory(&self) -> Option<&'static str> {
        match self {
            Self::Node => Some("nodejs"),
            Self::Rust => Some("rust"),
            Self::Shell => None,
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// YAML上のティア設定
///
/// ```yaml
/// collector:
///   instances: 3
///   runtime: nodejs
///   autoStart: true
/// ```
///
/// サービス固有の設定キーも同じマッピングに同居するため、未知のキーは無視する。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSpec {
    pub instances: usize,
    #[serde(default)]
    pub auto_start: Option<bool>,
    #[serde(default)]
    pub runtime: Option<RuntimeKind>,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub command: Option<String>,
}

/// 解決済みのティア
///
/// 実行中は不変。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub name: String,
    pub instances: usize,
    pub runtime: RuntimeKind,
    pub auto_start: bool,
    /// プロジェクトルートからの相対パス（絶対パスも可）
    pub directory: PathBuf,
    pub command: Option<String>,
}

impl Tier {
    pub fn new(name: impl Into<String>, instances: usize) -> Self {
        let name = name.into();
        Self {
            directory: PathBuf::from(&name),
            name,
            instances,
            runtime: RuntimeKind::default(),
            auto_start: true,
            command: None,
        }
    }

    pub fn with_runtime(mut self, runtime: RuntimeKind) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.runtime = RuntimeKind::Shell;
        self.command = Some(command.into());
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// プロセスを起動する作業ディレクトリ
    ///
    /// nodejs は `<dir>/nodejs`、rust は `<dir>/rust`、shell は `<dir>` そのもの。
    pub fn working_dir(&self, project_root: &Path) -> PathBuf {
        let base = project_root.join(&self.directory);
        match self.runtime.subdirectory() {
            Some(sub) => base.join(sub),
            None => base,
        }
    }

    /// YAMLのティア設定から解決済みティアを作る
    ///
    /// `directory` 未指定時は `event-<name>` が存在すればそれを、なければ `<name>` を使う。
    pub fn from_spec(name: &str, spec: TierSpec, project_root: &Path) -> Self {
        let directory = spec.directory.unwrap_or_else(|| {
            let legacy = PathBuf::from(format!("event-{}", name));
            if project_root.join(&legacy).is_dir() {
                legacy
            } else {
                PathBuf::from(name)
            }
        });

        let runtime = match (&spec.runtime, &spec.command) {
            (Some(runtime), _) => *runtime,
            (None, Some(_)) => RuntimeKind::Shell,
            (None, None) => RuntimeKind::default(),
        };

        Self {
            name: name.to_string(),
            instances: spec.instances,
            runtime,
            auto_start: spec.auto_start.unwrap_or(true),
            directory,
            command: spec.command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_kind_yaml() {
        let kind: RuntimeKind = serde_yaml::from_str("nodejs").unwrap();
        assert_eq!(kind, RuntimeKind::Node);
        let kind: RuntimeKind = serde_yaml::from_str("rust").unwrap();
        assert_eq!(kind, RuntimeKind::Rust);
        assert!(serde_yaml::from_str::<RuntimeKind>("jvm").is_err());
    }

    #[test]
    fn test_working_dir_by_runtime() {
        let root = Path::new("/srv/fleet");

        let node = Tier::new("collector", 1).with_directory("event-collector");
        assert_eq!(
            node.working_dir(root),
            PathBuf::from("/srv/fleet/event-collector/nodejs")
        );

        let rust = node.clone().with_runtime(RuntimeKind::Rust);
        assert_eq!(
            rust.working_dir(root),
            PathBuf::from("/srv/fleet/event-collector/rust")
        );

        let shell = Tier::new("finder", 1).with_command("./run.sh");
        assert_eq!(shell.working_dir(root), PathBuf::from("/srv/fleet/finder"));
    }

    #[test]
    fn test_from_spec_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let spec = TierSpec {
            instances: 2,
            ..Default::default()
        };

        let tier = Tier::from_spec("generator", spec, temp.path());
        assert_eq!(tier.instances, 2);
        assert_eq!(tier.runtime, RuntimeKind::Node);
        assert!(tier.auto_start);
        assert_eq!(tier.directory, PathBuf::from("generator"));
    }

    #[test]
    fn test_from_spec_legacy_directory() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp.path().join("event-finder")).unwrap();

        let spec = TierSpec {
            instances: 1,
            runtime: Some(RuntimeKind::Rust),
            auto_start: Some(false),
            ..Default::default()
        };

        let tier = Tier::from_spec("finder", spec, temp.path());
        assert_eq!(tier.directory, PathBuf::from("event-finder"));
        assert_eq!(tier.runtime, RuntimeKind::Rust);
        assert!(!tier.auto_start);
    }

    #[test]
    fn test_from_spec_command_implies_shell() {
        let temp = tempfile::tempdir().unwrap();
        let spec = TierSpec {
            instances: 1,
            command: Some("python3 -m http.server".to_string()),
            ..Default::default()
        };

        let tier = Tier::from_spec("static", spec, temp.path());
        assert_eq!(tier.runtime, RuntimeKind::Shell);
    }
}
