//! 準備完了待機ポリシー（Exponential Backoff）

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// ヘルスチェックのポーリング設定
///
/// `max_attempts` と `timeout_ms` はどちらも未指定なら無制限に待つ。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessPolicy {
    /// ヘルスチェックのパス
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// 最初のチェックまでの待機時間（ミリ秒）
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    /// リトライ間隔（ミリ秒）
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,
    /// リトライ間隔の上限（ミリ秒）
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,
    /// Exponential倍率
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// 1リクエストあたりのタイムアウト（ミリ秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// インスタンスごとの最大失敗回数
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// ティア全体の待機上限（ミリ秒）
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_health_path() -> String {
    "/ping".to_string()
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_retry_interval() -> u64 {
    200
}
fn default_max_interval() -> u64 {
    5000
}
fn default_multiplier() -> f64 {
    1.0
}
fn default_request_timeout() -> u64 {
    1000
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            health_path: default_health_path(),
            initial_delay_ms: default_initial_delay(),
            retry_interval_ms: default_retry_interval(),
            max_interval_ms: default_max_interval(),
            multiplier: default_multiplier(),
            request_timeout_ms: default_request_timeout(),
            max_attempts: None,
            timeout_ms: None,
        }
    }
}

impl ReadinessPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// 連続失敗 `attempt` 回目の後の待機時間
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.retry_interval_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped = (delay as u64).min(self.max_interval_ms.max(self.retry_interval_ms));
        Duration::from_millis(capped)
    }

    /// 失敗回数が上限に達したか
    pub fn attempts_exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }

    /// ヘルスチェックURLを組み立てる
    pub fn health_url(&self, port: u16) -> String {
        let path = if self.health_path.starts_with('/') {
            self.health_path.clone()
        } else {
            format!("/{}", self.health_path)
        };
        format!("http://localhost:{}{}", port, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_unbounded() {
        let policy = ReadinessPolicy::default();
        assert_eq!(policy.health_path, "/ping");
        assert_eq!(policy.initial_delay(), Duration::from_secs(1));
        assert!(policy.max_attempts.is_none());
        assert!(policy.timeout().is_none());
        assert!(!policy.attempts_exhausted(u32::MAX));
    }

    #[test]
    fn test_constant_interval_by_default() {
        let policy = ReadinessPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(200));
    }

    #[test]
    fn test_delay_calculation() {
        let policy = ReadinessPolicy {
            retry_interval_ms: 100,
            max_interval_ms: 1000,
            multiplier: 2.0,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1000)); // capped at max
    }

    #[test]
    fn test_attempts_exhausted() {
        let policy = ReadinessPolicy {
            max_attempts: Some(3),
            ..Default::default()
        };
        assert!(!policy.attempts_exhausted(2));
        assert!(policy.attempts_exhausted(3));
    }

    #[test]
    fn test_health_url() {
        let mut policy = ReadinessPolicy::default();
        assert_eq!(policy.health_url(7700), "http://localhost:7700/ping");

        policy.health_path = "healthz".to_string();
        assert_eq!(policy.health_url(8080), "http://localhost:8080/healthz");
    }

    #[test]
    fn test_policy_from_yaml() {
        let policy: ReadinessPolicy =
            serde_yaml::from_str("initialDelayMs: 0\nmaxAttempts: 5\ntimeoutMs: 30000\n").unwrap();
        assert_eq!(policy.initial_delay_ms, 0);
        assert_eq!(policy.max_attempts, Some(5));
        assert_eq!(policy.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(policy.retry_interval_ms, 200);
    }
}
