//! ティア単位の起動

use crate::error::Result;
use crate::handle::{Instance, InstanceExit};
use crate::launcher::{InstanceEnvironment, LaunchRequest, LauncherSet};
use crate::port::{PortAllocator, reclaim_port};
use crate::waiter::{HealthCheck, ReadinessProbe};
use std::path::Path;
use tierflow_core::Tier;
use tracing::{info, instrument};

/// フリート全体の状態
///
/// スーパーバイザーだけが所有する。
#[derive(Debug, Default)]
pub struct FleetState {
    /// 稼働中（または終了未確認）のインスタンス（起動順）
    pub instances: Vec<Instance>,
    /// 起動を行ったティア（起動順）
    pub started_tiers: Vec<String>,
    /// 終了を確認したインスタンス
    pub exits: Vec<InstanceExit>,
}

impl FleetState {
    pub fn ports(&self) -> Vec<u16> {
        self.instances.iter().map(|i| i.port).collect()
    }
}

/// 1ティア分のインスタンスを起動し、準備完了まで待つ
pub struct TierStarter<'a, H> {
    pub launchers: &'a LauncherSet,
    pub probe: &'a ReadinessProbe<H>,
    pub environment: &'a InstanceEnvironment,
    pub project_root: &'a Path,
    /// 割り当て前に占有プロセスを停止する
    pub reclaim_ports: bool,
}

impl<H: HealthCheck> TierStarter<'_, H> {
    /// 全インスタンスを起動してから、そのティアのインスタンスだけを待機する
    ///
    /// 起動したインスタンスは即座に `fleet` に追加されるので、
    /// 途中で失敗しても呼び出し側で停止できる。
    #[instrument(skip_all, fields(tier = %tier.name, instances = tier.instances))]
    pub async fn start_tier(
        &self,
        tier: &Tier,
        ports: &mut PortAllocator,
        fleet: &mut FleetState,
    ) -> Result<()> {
        let launcher = self.launchers.get(tier.runtime)?;
        let working_dir = tier.working_dir(self.project_root);
        let first = fleet.instances.len();

        info!(
            runtime = %tier.runtime,
            launcher = launcher.name(),
            working_dir = %working_dir.display(),
            "Starting tier"
        );

        for index in 0..tier.instances {
            let port = ports.next()?;
            if self.reclaim_ports {
                let reclaimed = reclaim_port(port).await;
                if !reclaimed.is_empty() {
                    info!(index, port, pids = ?reclaimed, "Reclaimed port for instance");
                }
            }

            let request = LaunchRequest {
                tier: tier.name.clone(),
                index,
                port,
                working_dir: working_dir.clone(),
                command: tier.command.clone(),
                env: self.environment.for_instance(index, port),
            };
            let handle = launcher.launch(&request)?;
            fleet.instances.push(Instance {
                handle,
                port,
                tier: tier.name.clone(),
                index,
            });
        }
        fleet.started_tiers.push(tier.name.clone());

        self.probe.await_ready(&mut fleet.instances[first..]).await?;
        info!("Tier ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessError;
    use std::collections::BTreeMap;
    use tierflow_core::ReadinessPolicy;

    struct AlwaysReady;

    impl HealthCheck for AlwaysReady {
        async fn is_ready(&self, _port: u16) -> bool {
            true
        }
    }

    fn policy() -> ReadinessPolicy {
        ReadinessPolicy {
            initial_delay_ms: 0,
            retry_interval_ms: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_tier_assigns_consecutive_ports() {
        let root = tempfile::tempdir().unwrap();
        let launchers = LauncherSet::standard();
        let probe = ReadinessProbe::new(AlwaysReady, policy());
        let environment = InstanceEnvironment::new("SERVICE_HTTP_PORT", BTreeMap::new());
        let starter = TierStarter {
            launchers: &launchers,
            probe: &probe,
            environment: &environment,
            project_root: root.path(),
            reclaim_ports: false,
        };

        let mut ports = PortAllocator::new(7700);
        let mut fleet = FleetState::default();
        let collector = Tier::new("collector", 3)
            .with_command("sleep 30")
            .with_directory(".");
        let generator = Tier::new("generator", 2)
            .with_command("sleep 30")
            .with_directory(".");

        starter.start_tier(&collector, &mut ports, &mut fleet).await.unwrap();
        starter.start_tier(&generator, &mut ports, &mut fleet).await.unwrap();

        assert_eq!(fleet.ports(), vec![7700, 7701, 7702, 7703, 7704]);
        assert_eq!(fleet.started_tiers, vec!["collector", "generator"]);
        let indices: Vec<usize> = fleet.instances.iter().map(|i| i.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1]);

        for instance in &mut fleet.instances {
            instance.handle.kill_tree();
        }
    }

    #[tokio::test]
    async fn test_launch_failure_keeps_started_instances() {
        let root = tempfile::tempdir().unwrap();
        let launchers = LauncherSet::standard();
        let probe = ReadinessProbe::new(AlwaysReady, policy());
        let environment = InstanceEnvironment::new("SERVICE_HTTP_PORT", BTreeMap::new());
        let starter = TierStarter {
            launchers: &launchers,
            probe: &probe,
            environment: &environment,
            project_root: root.path(),
            reclaim_ports: false,
        };

        let mut ports = PortAllocator::new(7700);
        let mut fleet = FleetState::default();
        let collector = Tier::new("collector", 1)
            .with_command("sleep 30")
            .with_directory(".");
        // 存在しないディレクトリでは起動できない
        let finder = Tier::new("finder", 1).with_command("sleep 30");

        starter.start_tier(&collector, &mut ports, &mut fleet).await.unwrap();
        let err = starter
            .start_tier(&finder, &mut ports, &mut fleet)
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::LaunchFailed { .. }));
        assert_eq!(fleet.ports(), vec![7700]);
        // 失敗したインスタンスのポートも再利用されない
        assert_eq!(ports.issued(), &[7700, 7701]);

        for instance in &mut fleet.instances {
            instance.handle.kill_tree();
        }
    }
}
