//! インスタンスの起動方式
//!
//! ランタイムごとに `ProcessLauncher` の実装を持ち、
//! ティアの runtime で `LauncherSet` から選ぶ。

use crate::error::{ProcessError, Result};
use crate::handle::ProcessHandle;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tierflow_core::{INSTANCE_INDEX_VARIABLE, RuntimeKind};
use tokio::process::Command;
use tracing::info;

/// 1インスタンス分の起動要求
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub tier: String,
    pub index: usize,
    pub port: u16,
    pub working_dir: PathBuf,
    /// shell ランタイム用のコマンド
    pub command: Option<String>,
    /// 継承した環境変数に上書きする値
    pub env: BTreeMap<String, String>,
}

impl LaunchRequest {
    fn launch_error(&self, reason: impl Into<String>) -> ProcessError {
        ProcessError::LaunchFailed {
            tier: self.tier.clone(),
            index: self.index,
            working_dir: self.working_dir.clone(),
            reason: reason.into(),
        }
    }
}

/// プロセス起動戦略
///
/// 起動だけを行い、準備完了は待たない。
pub trait ProcessLauncher: Send + Sync {
    fn name(&self) -> &str;
    fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle>;
}

/// 固定のプログラムと引数で起動する
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: String,
    args: Vec<String>,
}

impl CommandLauncher {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `npm start`
    pub fn node() -> Self {
        Self::new("npm", ["start"])
    }

    /// `cargo run --release`
    pub fn cargo() -> Self {
        Self::new("cargo", ["run", "--release"])
    }
}

impl ProcessLauncher for CommandLauncher {
    fn name(&self) -> &str {
        &self.program
    }

    fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        spawn(cmd, request)
    }
}

/// `sh -c <command>` で起動する
#[derive(Debug, Clone, Default)]
pub struct ShellLauncher;

impl ProcessLauncher for ShellLauncher {
    fn name(&self) -> &str {
        "sh"
    }

    fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle> {
        let command = request
            .command
            .as_deref()
            .ok_or_else(|| request.launch_error("command が指定されていません"))?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        spawn(cmd, request)
    }
}

/// 共通の起動処理
///
/// 環境変数は継承した上で上書きし、子は独立したプロセスグループで起動する。
/// 標準出力・標準エラーはオペレーターの端末にそのまま流す。
fn spawn(mut cmd: Command, request: &LaunchRequest) -> Result<ProcessHandle> {
    cmd.current_dir(&request.working_dir)
        .envs(&request.env)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .process_group(0)
        .kill_on_drop(false);

    let child = cmd.spawn().map_err(|e| request.launch_error(e.to_string()))?;
    let handle = ProcessHandle::from_child(child).map_err(|e| request.launch_error(e.to_string()))?;

    info!(
        tier = %request.tier,
        index = request.index,
        port = request.port,
        pid = handle.pid(),
        "Instance launched"
    );
    Ok(handle)
}

/// ランタイム種別ごとのランチャー
#[derive(Clone)]
pub struct LauncherSet {
    launchers: HashMap<RuntimeKind, Arc<dyn ProcessLauncher>>,
}

impl LauncherSet {
    pub fn empty() -> Self {
        Self {
            launchers: HashMap::new(),
        }
    }

    /// nodejs / rust / shell の標準構成
    pub fn standard() -> Self {
        Self::empty()
            .with(RuntimeKind::Node, CommandLauncher::node())
            .with(RuntimeKind::Rust, CommandLauncher::cargo())
            .with(RuntimeKind::Shell, ShellLauncher)
    }

    pub fn with(mut self, kind: RuntimeKind, launcher: impl ProcessLauncher + 'static) -> Self {
        self.launchers.insert(kind, Arc::new(launcher));
        self
    }

    pub fn get(&self, kind: RuntimeKind) -> Result<Arc<dyn ProcessLauncher>> {
        self.launchers
            .get(&kind)
            .cloned()
            .ok_or_else(|| ProcessError::LauncherNotFound(kind.to_string()))
    }
}

impl Default for LauncherSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for LauncherSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self
            .launchers
            .iter()
            .map(|(kind, l)| format!("{}={}", kind, l.name()))
            .collect();
        names.sort();
        f.debug_struct("LauncherSet").field("launchers", &names).finish()
    }
}

/// インスタンスへ渡す環境変数の組み立て
#[derive(Debug, Clone)]
pub struct InstanceEnvironment {
    pub port_variable: String,
    /// 起動元の環境からそのまま引き渡す値
    pub secrets: BTreeMap<String, String>,
}

impl InstanceEnvironment {
    pub fn new(port_variable: impl Into<String>, secrets: BTreeMap<String, String>) -> Self {
        Self {
            port_variable: port_variable.into(),
            secrets,
        }
    }

    /// `index` 番目のインスタンス用の上書き値
    pub fn for_instance(&self, index: usize, port: u16) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let Ok(path) = std::env::var("PATH") {
            env.insert("PATH".to_string(), path);
        }
        for (key, value) in &self.secrets {
            env.insert(key.clone(), value.clone());
        }
        env.insert(INSTANCE_INDEX_VARIABLE.to_string(), index.to_string());
        env.insert(self.port_variable.clone(), port.to_string());
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(dir: &std::path::Path, command: Option<&str>) -> LaunchRequest {
        let environment = InstanceEnvironment::new(
            "SERVICE_HTTP_PORT",
            BTreeMap::from([("FLEET_SECRET".to_string(), "s3cr3t".to_string())]),
        );
        LaunchRequest {
            tier: "collector".to_string(),
            index: 2,
            port: 7702,
            working_dir: dir.to_path_buf(),
            command: command.map(String::from),
            env: environment.for_instance(2, 7702),
        }
    }

    #[test]
    fn test_environment_for_instance() {
        let environment = InstanceEnvironment::new(
            "NODE_HTTP_PORT",
            BTreeMap::from([("DB_URL".to_string(), "postgres://db".to_string())]),
        );

        let env = environment.for_instance(1, 7701);
        assert_eq!(env["INSTANCE_INDEX"], "1");
        assert_eq!(env["NODE_HTTP_PORT"], "7701");
        assert_eq!(env["DB_URL"], "postgres://db");
        assert!(env.contains_key("PATH"));
    }

    #[tokio::test]
    async fn test_shell_launcher_passes_environment() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"printf '%s %s %s %s' "$INSTANCE_INDEX" "$SERVICE_HTTP_PORT" "$FLEET_SECRET" "$(pwd)" > out.txt"#;

        let mut handle = ShellLauncher
            .launch(&request(dir.path(), Some(script)))
            .unwrap();
        let status = handle.wait_timeout(Duration::from_secs(5)).await.unwrap();
        assert!(status.success());

        let output = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        let fields: Vec<&str> = output.split(' ').collect();
        assert_eq!(&fields[..3], &["2", "7702", "s3cr3t"]);
        let reported = std::fs::canonicalize(fields[3]).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn test_shell_launcher_requires_command() {
        let dir = tempfile::tempdir().unwrap();
        let result = ShellLauncher.launch(&request(dir.path(), None));
        assert!(matches!(result, Err(ProcessError::LaunchFailed { .. })));
    }

    #[test]
    fn test_command_launcher_missing_directory() {
        let result = CommandLauncher::new("true", Vec::<String>::new())
            .launch(&request(std::path::Path::new("/nonexistent/event-collector"), None));

        match result {
            Err(ProcessError::LaunchFailed { tier, index, .. }) => {
                assert_eq!(tier, "collector");
                assert_eq!(index, 2);
            }
            other => panic!("Expected LaunchFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_launcher_set_lookup() {
        let set = LauncherSet::standard();
        assert_eq!(set.get(RuntimeKind::Node).unwrap().name(), "npm");
        assert_eq!(set.get(RuntimeKind::Rust).unwrap().name(), "cargo");
        assert_eq!(set.get(RuntimeKind::Shell).unwrap().name(), "sh");

        let empty = LauncherSet::empty();
        assert!(matches!(
            empty.get(RuntimeKind::Rust),
            Err(ProcessError::LauncherNotFound(_))
        ));
    }

    #[test]
    fn test_launcher_override() {
        let set = LauncherSet::standard().with(RuntimeKind::Node, CommandLauncher::new("pnpm", ["start"]));
        assert_eq!(set.get(RuntimeKind::Node).unwrap().name(), "pnpm");
    }
}
