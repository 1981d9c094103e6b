//! 子孫プロセスの探索
//!
//! `/proc/<pid>/status` の PPid から親子関係を組み立て、
//! 指定プロセスの子孫を葉から順に並べて返す。

use crate::error::{ProcessError, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use tracing::debug;

/// 子孫プロセス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescendantProcess {
    pub pid: u32,
    pub parent: u32,
    /// 起点プロセスからの深さ（子は1）
    pub depth: usize,
}

impl DescendantProcess {
    /// SIGKILL を送る
    ///
    /// 既に存在しないプロセスは成功扱い。
    pub fn kill(&self) -> Result<()> {
        match signal::kill(Pid::from_raw(self.pid as i32), Signal::SIGKILL) {
            Ok(()) => {
                debug!(pid = self.pid, depth = self.depth, "Killed descendant process");
                Ok(())
            }
            Err(Errno::ESRCH) => {
                debug!(pid = self.pid, "Descendant process already gone");
                Ok(())
            }
            Err(e) => Err(ProcessError::Teardown {
                pid: self.pid,
                reason: e.to_string(),
            }),
        }
    }
}

/// 指定プロセスの子孫を葉から順に返す
pub fn discover_descendants(pid: u32) -> Result<Vec<DescendantProcess>> {
    discover_descendants_from_proc(pid, Path::new("/proc"))
}

/// procfs のルートを指定して子孫を探す（テスト用）
///
/// 返り値はすべての子が親より前に並ぶ（深い順）。
pub fn discover_descendants_from_proc(
    pid: u32,
    proc_root: &Path,
) -> Result<Vec<DescendantProcess>> {
    let parent_map = read_parent_map(proc_root)?;

    // BFS で深さ順に集める
    let mut ordered = Vec::new();
    let mut queue = VecDeque::from([(pid, 0usize)]);
    while let Some((current, depth)) = queue.pop_front() {
        let Some(children) = parent_map.get(&current) else {
            continue;
        };
        for &child in children {
            // PID 再利用などで循環しても止まるように
            if child == pid || ordered.iter().any(|d: &DescendantProcess| d.pid == child) {
                continue;
            }
            ordered.push(DescendantProcess {
                pid: child,
                parent: current,
                depth: depth + 1,
            });
            queue.push_back((child, depth + 1));
        }
    }

    // 深い順（葉が先）に並べ替える
    ordered.reverse();
    Ok(ordered)
}

/// PPid -> 子 PID 一覧
fn read_parent_map(proc_root: &Path) -> Result<BTreeMap<u32, Vec<u32>>> {
    let entries = std::fs::read_dir(proc_root).map_err(|e| ProcessError::ProcScan {
        path: proc_root.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut parent_map: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };

        let child_pid: u32 = match entry.file_name().to_string_lossy().parse() {
            Ok(p) if p > 0 => p,
            _ => continue,
        };

        // 走査中に終了したプロセスは読めないので無視する
        let Ok(status) = std::fs::read_to_string(entry.path().join("status")) else {
            continue;
        };
        if let Some(ppid) = parse_ppid(&status) {
            parent_map.entry(ppid).or_default().push(child_pid);
        }
    }

    for children in parent_map.values_mut() {
        children.sort_unstable();
    }
    Ok(parent_map)
}

fn parse_ppid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("PPid:"))
        .and_then(|rest| rest.trim().parse().ok())
}
