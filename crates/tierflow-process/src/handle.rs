//! 起動済みプロセスのハンドル

use crate::error::{ProcessError, Result};
use crate::tree::{DescendantProcess, discover_descendants, discover_descendants_from_proc};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io;
use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, warn};

/// 子プロセスの排他的な所有ハンドル
///
/// 子は自身のプロセスグループのリーダーとして起動されている前提。
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: u32,
    exit: Option<ExitStatus>,
}

/// `kill_tree` の結果
#[derive(Debug, Default)]
pub struct KillOutcome {
    /// SIGKILL を送った子孫の数
    pub descendants: usize,
    /// 停止に失敗したもの（致命的ではない）
    pub errors: Vec<ProcessError>,
}

impl ProcessHandle {
    /// 起動直後の子からハンドルを作る
    ///
    /// PID が取れない（既に回収済みの）子は起動失敗として扱う。
    pub fn from_child(child: Child) -> io::Result<Self> {
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("spawned process exited before its pid was read"))?;
        Ok(Self {
            child,
            pid,
            exit: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// 終了していれば終了ステータスを返す（ブロックしない）
    pub fn try_exit(&mut self) -> Result<Option<ExitStatus>> {
        if self.exit.is_none() {
            self.exit = self.child.try_wait()?;
        }
        Ok(self.exit)
    }

    /// 子孫プロセス（葉が先）
    pub fn descendants(&self) -> Result<Vec<DescendantProcess>> {
        discover_descendants(self.pid)
    }

    /// 子孫を葉から順に停止し、最後に自身を停止する
    ///
    /// 走査後に生まれた孫を取りこぼさないよう、最後にプロセスグループ全体にも SIGKILL を送る。
    pub fn kill_tree(&mut self) -> KillOutcome {
        self.kill_tree_in(Path::new("/proc"))
    }

    /// procfs のルートを指定して停止する
    ///
    /// 子孫を列挙できなくても、プロセスグループへの SIGKILL が通れば失敗とはしない。
    pub(crate) fn kill_tree_in(&mut self, proc_root: &Path) -> KillOutcome {
        let mut outcome = KillOutcome::default();
        let mut scan_error = None;

        match discover_descendants_from_proc(self.pid, proc_root) {
            Ok(descendants) => {
                for descendant in &descendants {
                    debug!(
                        "  killing child process {} (parent {})",
                        descendant.pid, descendant.parent
                    );
                    match descendant.kill() {
                        Ok(()) => outcome.descendants += 1,
                        Err(e) => outcome.errors.push(e),
                    }
                }
            }
            Err(e) => {
                warn!(
                    pid = self.pid,
                    "Could not enumerate descendants, relying on process group kill: {}", e
                );
                scan_error = Some(e);
            }
        }

        if let Err(e) = self.child.start_kill() {
            outcome.errors.push(ProcessError::Teardown {
                pid: self.pid,
                reason: e.to_string(),
            });
        }

        match signal::killpg(Pid::from_raw(self.pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => {
                outcome.errors.extend(scan_error);
                outcome.errors.push(ProcessError::Teardown {
                    pid: self.pid,
                    reason: format!("killpg: {}", e),
                });
            }
        }

        outcome
    }

    /// 終了を待つ（`timeout` を超えたら None）
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Option<ExitStatus> {
        if let Some(status) = self.exit {
            return Some(status);
        }
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.exit = Some(status);
                Some(status)
            }
            Ok(Err(e)) => {
                warn!(pid = self.pid, "Failed to wait for process: {}", e);
                None
            }
            Err(_) => None,
        }
    }
}

/// 1ティアに属する1インスタンス
#[derive(Debug)]
pub struct Instance {
    pub handle: ProcessHandle,
    pub port: u16,
    pub tier: String,
    pub index: usize,
}

impl Instance {
    pub fn label(&self) -> String {
        format!("{}#{} (localhost:{}, pid {})", self.tier, self.index, self.port, self.handle.pid())
    }
}

/// 終了したインスタンスの記録
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceExit {
    pub tier: String,
    pub index: usize,
    pub port: u16,
    /// シグナルで終了した場合は None
    pub exit_code: Option<i32>,
}

impl InstanceExit {
    pub fn from_status(instance: &Instance, status: ExitStatus) -> Self {
        Self {
            tier: instance.tier.clone(),
            index: instance.index,
            port: instance.port,
            exit_code: status.code(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}
