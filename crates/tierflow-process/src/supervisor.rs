//! フリート全体の起動・監視・停止
//!
//! ティアを順番に起動し、全インスタンスの終了を待つ。
//! 途中でエラーやシャットダウンシグナルが発生した場合は、
//! 稼働中のインスタンスを子孫ごと停止する。

use crate::error::{ProcessError, Result, describe_exit_code};
use crate::handle::InstanceExit;
use crate::launcher::{InstanceEnvironment, LauncherSet};
use crate::port::PortAllocator;
use crate::signals::wait_for_shutdown_signal;
use crate::tier::{FleetState, TierStarter};
use crate::waiter::{HealthCheck, ReadinessProbe};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tierflow_core::Tier;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// 稼働監視のポーリング間隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 停止要求後に終了を待つ時間
pub const KILL_WAIT: Duration = Duration::from_secs(5);

/// スーパーバイザーの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetPhase {
    Idle,
    /// n 番目のティアを起動中
    StartingTier(usize),
    AllReady,
    Running,
    Completed,
    Aborting,
    Terminated,
}

/// 停止処理の結果
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// 停止したインスタンス数
    pub killed: usize,
    /// 停止した子孫プロセスの数
    pub descendants: usize,
    /// 既に終了していたインスタンス数
    pub skipped: usize,
    /// 停止に失敗したもの（ログ出力済み）
    pub errors: Vec<ProcessError>,
}

/// 1回の実行結果
#[derive(Debug)]
pub struct FleetOutcome {
    /// プロセスの終了コード（正常終了 0、中断 1、シグナル 130）
    pub exit_code: i32,
    /// 中断の原因
    pub error: Option<ProcessError>,
    pub teardown: TeardownReport,
    /// 終了を確認したインスタンス
    pub exits: Vec<InstanceExit>,
    /// 払い出したポート（払い出し順）
    pub ports: Vec<u16>,
    /// 通過した状態の履歴
    pub phases: Vec<FleetPhase>,
}

impl FleetOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// フリートの唯一の所有者であり、停止処理の責任者
pub struct FleetSupervisor<H> {
    launchers: LauncherSet,
    probe: ReadinessProbe<H>,
    environment: InstanceEnvironment,
    project_root: PathBuf,
    start_port: u16,
    reclaim_ports: bool,
    poll_interval: Duration,
    phase: FleetPhase,
    phases: Vec<FleetPhase>,
    fleet: FleetState,
}

impl<H: HealthCheck> FleetSupervisor<H> {
    pub fn new(
        probe: ReadinessProbe<H>,
        environment: InstanceEnvironment,
        project_root: impl Into<PathBuf>,
        start_port: u16,
    ) -> Self {
        Self {
            launchers: LauncherSet::standard(),
            probe,
            environment,
            project_root: project_root.into(),
            start_port,
            reclaim_ports: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            phase: FleetPhase::Idle,
            phases: vec![FleetPhase::Idle],
            fleet: FleetState::default(),
        }
    }

    pub fn with_launchers(mut self, launchers: LauncherSet) -> Self {
        self.launchers = launchers;
        self
    }

    pub fn with_port_reclaim(mut self, reclaim: bool) -> Self {
        self.reclaim_ports = reclaim;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn phase(&self) -> FleetPhase {
        self.phase
    }

    pub fn fleet(&self) -> &FleetState {
        &self.fleet
    }

    /// SIGINT / SIGTERM / SIGQUIT を監視しながら実行する
    pub async fn run(&mut self, tiers: &[Tier]) -> FleetOutcome {
        let shutdown = async {
            match wait_for_shutdown_signal().await {
                Ok(signal) => signal,
                Err(e) => {
                    warn!("Failed to install signal handlers: {}", e);
                    std::future::pending().await
                }
            }
        };
        self.run_until(tiers, shutdown).await
    }

    /// `shutdown` が完了したらシグナル受信として中断する
    pub async fn run_until<F>(&mut self, tiers: &[Tier], shutdown: F) -> FleetOutcome
    where
        F: Future<Output = String>,
    {
        let mut ports = PortAllocator::new(self.start_port);

        let result = tokio::select! {
            result = self.drive(tiers, &mut ports) => result,
            signal = shutdown => {
                warn!(%signal, "Shutdown signal received");
                Err(ProcessError::Interrupted { signal })
            }
        };

        let (exit_code, error, teardown) = match result {
            Ok(()) => {
                self.transition(FleetPhase::Completed);
                info!(instances = self.fleet.exits.len(), "All instances finished");
                (0, None, TeardownReport::default())
            }
            Err(e) => {
                error!("Aborting fleet: {}", e);
                self.transition(FleetPhase::Aborting);
                let teardown = self.teardown().await;
                (e.exit_code(), Some(e), teardown)
            }
        };
        self.transition(FleetPhase::Terminated);

        FleetOutcome {
            exit_code,
            error,
            teardown,
            exits: self.fleet.exits.clone(),
            ports: ports.issued().to_vec(),
            phases: self.phases.clone(),
        }
    }

    /// 起動から全終了までの正常系
    async fn drive(&mut self, tiers: &[Tier], ports: &mut PortAllocator) -> Result<()> {
        for (i, tier) in tiers.iter().enumerate() {
            if !tier.auto_start {
                info!(tier = %tier.name, "Skipping tier (autoStart: false)");
                continue;
            }
            self.transition(FleetPhase::StartingTier(i));

            let starter = TierStarter {
                launchers: &self.launchers,
                probe: &self.probe,
                environment: &self.environment,
                project_root: &self.project_root,
                reclaim_ports: self.reclaim_ports,
            };
            starter.start_tier(tier, ports, &mut self.fleet).await?;
        }

        self.transition(FleetPhase::AllReady);
        info!(
            instances = self.fleet.instances.len(),
            "All tiers ready"
        );

        self.transition(FleetPhase::Running);
        loop {
            self.reap();
            if self.fleet.instances.is_empty() {
                return Ok(());
            }
            sleep(self.poll_interval).await;
        }
    }

    /// 終了したインスタンスを取り除き、終了コードを記録する
    fn reap(&mut self) {
        let FleetState {
            instances, exits, ..
        } = &mut self.fleet;

        instances.retain_mut(|instance| match instance.handle.try_exit() {
            Ok(Some(status)) => {
                let exit = InstanceExit::from_status(instance, status);
                if exit.succeeded() {
                    info!("{} exited", instance.label());
                } else {
                    warn!(
                        "{} exited: {}",
                        instance.label(),
                        describe_exit_code(&exit.exit_code)
                    );
                }
                exits.push(exit);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Failed to poll {}: {}", instance.label(), e);
                true
            }
        });
    }

    /// 稼働中の全インスタンスを子孫ごと停止する
    ///
    /// 後から起動したものから停止する。2回目以降の呼び出しは何もしない。
    pub async fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        let instances = std::mem::take(&mut self.fleet.instances);

        for mut instance in instances.into_iter().rev() {
            match instance.handle.try_exit() {
                Ok(Some(status)) => {
                    debug!("{} already exited", instance.label());
                    self.fleet
                        .exits
                        .push(InstanceExit::from_status(&instance, status));
                    report.skipped += 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to poll {}: {}", instance.label(), e),
            }

            warn!("Killing {}", instance.label());
            let outcome = instance.handle.kill_tree();
            report.killed += 1;
            report.descendants += outcome.descendants;
            for e in outcome.errors {
                warn!("Teardown error: {}", e);
                report.errors.push(e);
            }

            if instance.handle.wait_timeout(KILL_WAIT).await.is_none() {
                let e = ProcessError::Teardown {
                    pid: instance.handle.pid(),
                    reason: format!("did not exit within {}s", KILL_WAIT.as_secs()),
                };
                warn!("Teardown error: {}", e);
                report.errors.push(e);
            }
        }

        if report.killed > 0 {
            info!(
                killed = report.killed,
                descendants = report.descendants,
                errors = report.errors.len(),
                "Teardown finished"
            );
        }
        report
    }

    fn transition(&mut self, next: FleetPhase) {
        debug!(from = ?self.phase, to = ?next, "Fleet phase");
        self.phase = next;
        self.phases.push(next);
    }
}
