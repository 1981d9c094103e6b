//! 準備完了待機（ラウンドロビン + Exponential Backoff）
//!
//! ティア内のインスタンスを順番にポーリングし、
//! 応答したものから待機対象を外していく。

use crate::error::{ProcessError, Result};
use crate::handle::Instance;
use std::collections::VecDeque;
use tierflow_core::ReadinessPolicy;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument};

/// 1回分のヘルスチェック
#[allow(async_fn_in_trait)]
pub trait HealthCheck {
    /// `localhost:<port>` が準備完了なら true
    async fn is_ready(&self, port: u16) -> bool;
}

/// HTTP GET による標準のヘルスチェック
///
/// ステータスコードに関わらず応答があれば準備完了とみなす。
/// 接続エラーとタイムアウトだけが未完了。
#[derive(Debug, Clone)]
pub struct HttpHealthCheck {
    client: reqwest::Client,
    policy: ReadinessPolicy,
}

impl HttpHealthCheck {
    pub fn new(policy: ReadinessPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(policy.request_timeout())
            .build()
            .map_err(|e| ProcessError::ConfigError(format!("HTTP クライアントの初期化に失敗: {}", e)))?;
        Ok(Self { client, policy })
    }
}

impl HealthCheck for HttpHealthCheck {
    async fn is_ready(&self, port: u16) -> bool {
        let url = self.policy.health_url(port);
        match self.client.get(&url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    debug!(%url, %status, "Health check response");
                } else {
                    debug!(%url, %status, "Health check answered with non-success status");
                }
                true
            }
            Err(e) => {
                debug!(%url, "Health check failed: {}", e);
                false
            }
        }
    }
}

/// ティア単位の準備完了待機
#[derive(Debug, Clone)]
pub struct ReadinessProbe<H> {
    checker: H,
    policy: ReadinessPolicy,
}

impl<H: HealthCheck> ReadinessProbe<H> {
    pub fn new(checker: H, policy: ReadinessPolicy) -> Self {
        Self { checker, policy }
    }

    /// 全インスタンスが応答するまで待つ
    ///
    /// 待機中にインスタンスが終了した場合は `InstanceExited`、
    /// 上限を超えた場合は `ProbeTimeout` を返す。
    #[instrument(skip_all, fields(instances = instances.len()))]
    pub async fn await_ready(&self, instances: &mut [Instance]) -> Result<()> {
        if instances.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        sleep(self.policy.initial_delay()).await;

        let mut pending: VecDeque<usize> = (0..instances.len()).collect();
        let mut failures = vec![0u32; instances.len()];
        let mut consecutive = 0u32;

        while let Some(i) = pending.pop_front() {
            let instance = &mut instances[i];

            if let Some(status) = instance.handle.try_exit()? {
                return Err(ProcessError::InstanceExited {
                    tier: instance.tier.clone(),
                    port: instance.port,
                    exit_code: status.code(),
                });
            }

            if self.checker.is_ready(instance.port).await {
                info!(
                    tier = %instance.tier,
                    port = instance.port,
                    remaining = pending.len(),
                    "Instance ready"
                );
                consecutive = 0;
                continue;
            }

            failures[i] += 1;
            let exhausted = self.policy.attempts_exhausted(failures[i])
                || self
                    .policy
                    .timeout()
                    .is_some_and(|limit| started.elapsed() >= limit);
            if exhausted {
                return Err(ProcessError::ProbeTimeout {
                    tier: instance.tier.clone(),
                    port: instance.port,
                    attempts: failures[i],
                });
            }

            pending.push_back(i);
            sleep(self.policy.delay_for_attempt(consecutive)).await;
            consecutive = consecutive.saturating_add(1);
        }

        Ok(())
    }
}
