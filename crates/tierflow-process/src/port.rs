//! ポート割り当てと占有ポートの解放

use crate::error::{ProcessError, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::Command;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const RECLAIM_GRACE: Duration = Duration::from_secs(5);
const RELEASE_WAIT: Duration = Duration::from_secs(1);

/// インスタンスごとに単調増加するポート番号を払い出す
///
/// 1回の実行の中で同じポートを二度返すことはない。
#[derive(Debug, Clone)]
pub struct PortAllocator {
    next: u32,
    issued: Vec<u16>,
}

impl PortAllocator {
    pub fn new(start: u16) -> Self {
        Self {
            next: u32::from(start),
            issued: Vec::new(),
        }
    }

    /// 現在の値を返してから1つ進める
    pub fn next(&mut self) -> Result<u16> {
        let port = u16::try_from(self.next)
            .map_err(|_| ProcessError::PortRangeExhausted { next: self.next })?;
        self.next += 1;
        self.issued.push(port);
        Ok(port)
    }

    /// 払い出し済みのポート（払い出し順）
    pub fn issued(&self) -> &[u16] {
        &self.issued
    }
}

/// `terminate_gracefully` の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// シグナルを送る時点で存在しなかった
    AlreadyGone,
    /// SIGTERM で終了した
    Exited,
    /// 猶予内に終了せず SIGKILL を送った
    Killed,
    /// シグナルを送る権限がない
    Denied,
}

/// ポートで LISTEN しているプロセスの PID（重複なし、昇順）
///
/// `lsof` が無い、または何も見つからない場合は空。
pub fn find_listeners(port: u16) -> Vec<u32> {
    let output = Command::new("lsof")
        .args(["-t", "-nP", "-sTCP:LISTEN"])
        .arg(format!("-iTCP:{}", port))
        .output();

    match output {
        Ok(out) if out.status.success() => parse_pid_list(&String::from_utf8_lossy(&out.stdout)),
        Ok(_) => Vec::new(),
        Err(e) => {
            debug!(port, "lsof unavailable: {}", e);
            Vec::new()
        }
    }
}

fn parse_pid_list(stdout: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = stdout
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .filter(|&pid| pid > 0)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// SIGTERM を送り、`grace` の間に終了しなければ SIGKILL を送る
#[instrument(skip(grace))]
pub async fn terminate_gracefully(pid: u32, grace: Duration) -> Termination {
    let Some(target) = single_process(pid) else {
        return Termination::AlreadyGone;
    };

    match signal::kill(target, Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Termination::AlreadyGone,
        Err(e) => {
            warn!("Cannot signal process: {}", e);
            return Termination::Denied;
        }
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            debug!("Process exited after SIGTERM");
            return Termination::Exited;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    warn!(grace_ms = grace.as_millis() as u64, "Process ignored SIGTERM, sending SIGKILL");
    match signal::kill(target, Signal::SIGKILL) {
        Err(Errno::ESRCH) => Termination::Exited,
        _ => Termination::Killed,
    }
}

/// 割り当て予定のポートを掴んでいる他プロセスを停止し、その PID を返す
///
/// 自分自身が LISTEN しているポートには手を出さない。
pub async fn reclaim_port(port: u16) -> Vec<u32> {
    let own_pid = std::process::id();
    let holders: Vec<u32> = find_listeners(port)
        .into_iter()
        .filter(|&pid| pid != own_pid)
        .collect();
    if holders.is_empty() {
        return holders;
    }

    for &pid in &holders {
        warn!(port, pid, "Port is held by another process, terminating it");
        let outcome = terminate_gracefully(pid, RECLAIM_GRACE).await;
        debug!(port, pid, ?outcome, "Port holder terminated");
    }

    // カーネルがソケットを手放すまで少し待つ
    let deadline = Instant::now() + RELEASE_WAIT;
    while Instant::now() < deadline {
        if find_listeners(port).iter().all(|&pid| pid == own_pid) {
            return holders;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    warn!(port, "Port is still in use after reclaiming it");
    holders
}

/// 単一プロセスを指す `Pid` に変換する（0 と負数はプロセスグループ宛てになる）
fn single_process(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().filter(|&raw| raw > 0).map(Pid::from_raw)
}

/// プロセスが生きているか（ゾンビは終了済みとみなす）
pub(crate) fn is_process_alive(pid: u32) -> bool {
    let Some(target) = single_process(pid) else {
        return false;
    };
    if signal::kill(target, None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/status", pid)) {
        Ok(status) => !status.lines().any(|l| l.starts_with("State:") && l.contains('Z')),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ports_are_monotonic_and_distinct() {
        let mut ports = PortAllocator::new(7700);
        let issued: Vec<u16> = (0..5).map(|_| ports.next().unwrap()).collect();

        assert_eq!(issued, vec![7700, 7701, 7702, 7703, 7704]);
        assert_eq!(ports.issued(), issued.as_slice());
        assert_eq!(ports.next().unwrap(), 7705);
    }

    #[test]
    fn test_last_port_then_exhausted() {
        let mut ports = PortAllocator::new(u16::MAX);
        assert_eq!(ports.next().unwrap(), u16::MAX);

        let err = ports.next().unwrap_err();
        assert!(matches!(err, ProcessError::PortRangeExhausted { next: 65536 }));
        // 失敗しても払い出し履歴は変わらない
        assert_eq!(ports.issued(), &[u16::MAX]);
    }

    #[test]
    fn test_parse_pid_list() {
        assert_eq!(parse_pid_list("412\n  97\n412\np412\n\n0\n"), vec![97, 412]);
        assert!(parse_pid_list("").is_empty());
    }

    #[test]
    fn test_is_process_alive_for_self() {
        assert!(is_process_alive(std::process::id()));
    }

    #[tokio::test]
    async fn test_terminate_rejects_group_targets() {
        for pid in [0, u32::MAX] {
            let outcome = terminate_gracefully(pid, Duration::from_millis(10)).await;
            assert_eq!(outcome, Termination::AlreadyGone);
        }
    }

    #[tokio::test]
    async fn test_terminate_missing_process() {
        // PID の上限を超える値は存在しない
        let outcome = terminate_gracefully(i32::MAX as u32, Duration::from_millis(10)).await;
        assert_eq!(outcome, Termination::AlreadyGone);
    }

    #[tokio::test]
    async fn test_terminate_gracefully_stops_child() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        // 回収前のゾンビも終了扱いになる
        let outcome = terminate_gracefully(pid, Duration::from_secs(2)).await;
        assert_eq!(outcome, Termination::Exited);

        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_reclaim_skips_own_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(reclaim_port(port).await.is_empty());
        // 自分のソケットは生きたまま
        assert!(listener.local_addr().is_ok());
        assert!(std::net::TcpStream::connect(("127.0.0.1", port)).is_ok());
    }
}
