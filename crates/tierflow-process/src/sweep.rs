//! 前回実行の残存プロセスの掃除
//!
//! 作業ディレクトリがティアのディレクトリ配下にあり、かつ
//! node / cargo かティアのディレクトリ内のプログラムを実行しているものだけを
//! グレースフルに停止する。

use crate::error::{ProcessError, Result};
use crate::port::{Termination, terminate_gracefully};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const SWEEP_GRACE: Duration = Duration::from_secs(5);

/// サービスとみなす実行ファイル名の末尾
const SERVICE_PROGRAMS: [&str; 2] = ["node", "cargo"];

/// 残存プロセス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleProcess {
    pub pid: u32,
    pub cwd: PathBuf,
    /// `cmdline` の先頭要素
    pub program: String,
}

/// 掃除対象のディレクトリを決める
///
/// プロジェクトルートそのもの（とその親）は対象にしない。
pub fn sweep_targets(dirs: &[PathBuf], project_root: &Path) -> Vec<PathBuf> {
    let root = canonical(project_root);
    let mut targets = Vec::new();
    for dir in dirs {
        let target = canonical(dir);
        if root.starts_with(&target) {
            warn!(
                dir = %dir.display(),
                "Tier directory is the project root, not sweeping it"
            );
            continue;
        }
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    targets
}

/// 条件に合う残存プロセスを探す
pub fn find_processes_in_dirs(dirs: &[PathBuf]) -> Result<Vec<StaleProcess>> {
    find_processes_in_dirs_from_proc(dirs, Path::new("/proc"))
}

/// procfs のルートを指定して探す（テスト用）
pub fn find_processes_in_dirs_from_proc(
    dirs: &[PathBuf],
    proc_root: &Path,
) -> Result<Vec<StaleProcess>> {
    let entries = std::fs::read_dir(proc_root).map_err(|e| ProcessError::ProcScan {
        path: proc_root.to_path_buf(),
        reason: e.to_string(),
    })?;

    // 比較はシンボリックリンク解決後のパスで行う
    let targets: Vec<PathBuf> = dirs.iter().map(|d| canonical(d)).collect();
    if targets.is_empty() {
        return Ok(Vec::new());
    }
    let own_pid = std::process::id();

    let mut found = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let pid: u32 = match entry.file_name().to_string_lossy().parse() {
            Ok(p) if p > 0 => p,
            _ => continue,
        };
        if pid == own_pid {
            continue;
        }

        // 権限のないプロセスや終了済みのものは読めない
        let Ok(cwd) = std::fs::read_link(entry.path().join("cwd")) else {
            continue;
        };
        if !targets.iter().any(|t| cwd.starts_with(t)) {
            continue;
        }
        let Some(program) = read_program(&entry.path()) else {
            continue;
        };
        if !is_service_program(&program, &cwd, &targets) {
            debug!(pid, %program, "Leaving unrelated process in tier directory alone");
            continue;
        }

        debug!(pid, %program, cwd = %cwd.display(), "Found stale process");
        found.push(StaleProcess { pid, cwd, program });
    }

    found.sort_by_key(|p| p.pid);
    Ok(found)
}

/// `cmdline` の先頭要素（カーネルスレッドなど空のものは None）
fn read_program(proc_dir: &Path) -> Option<String> {
    let raw = std::fs::read(proc_dir.join("cmdline")).ok()?;
    let first = raw.split(|&b| b == 0).next()?;
    if first.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(first).into_owned())
}

/// node / cargo か、ティアのディレクトリ内の実行ファイルか
fn is_service_program(program: &str, cwd: &Path, targets: &[PathBuf]) -> bool {
    let path = Path::new(program);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    if SERVICE_PROGRAMS.iter().any(|p| name.ends_with(p)) {
        return true;
    }

    // パス区切りを含まない名前は PATH から解決されたもの
    if !program.contains('/') {
        return false;
    }
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    targets.iter().any(|t| resolved.starts_with(t))
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// 残存プロセスを停止し、停止したものを返す
pub async fn sweep_stale_processes(
    dirs: &[PathBuf],
    project_root: &Path,
) -> Result<Vec<StaleProcess>> {
    let targets = sweep_targets(dirs, project_root);
    let stale = find_processes_in_dirs(&targets)?;
    let mut stopped = Vec::with_capacity(stale.len());
    for process in stale {
        info!(
            pid = process.pid,
            program = %process.program,
            cwd = %process.cwd.display(),
            "Stopping process left over from a previous run"
        );
        match terminate_gracefully(process.pid, SWEEP_GRACE).await {
            Termination::Denied => {}
            Termination::AlreadyGone | Termination::Exited | Termination::Killed => {
                stopped.push(process)
            }
        }
    }
    Ok(stopped)
}
