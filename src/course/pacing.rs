// 请求节奏控制（随机间隔，避免触发站点风控）

use crate::config::PacingConfig;
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 两次下载之间的随机等待
///
/// 等待时长在 [min, max] 内均匀分布；max 为 0 时完全不等待（测试用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacer {
    min: Duration,
    max: Duration,
}

impl Pacer {
    pub fn new(min: Duration, max: Duration) -> Self {
        // min > max 时以 min 为准
        Self {
            min,
            max: max.max(min),
        }
    }

    /// 不等待
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn from_config(config: &PacingConfig) -> Self {
        Self::new(
            Duration::from_millis(config.min_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    pub fn is_disabled(&self) -> bool {
        self.max.is_zero()
    }

    /// 抽取下一次等待时长
    pub fn next_delay(&self) -> Duration {
        if self.is_disabled() {
            return Duration::ZERO;
        }
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }

    /// 等待一个随机间隔
    ///
    /// 返回 false 表示等待期间收到了取消信号
    pub async fn pause(&self, cancel: &CancellationToken) -> bool {
        let delay = self.next_delay();
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }

        debug!("等待 {:?} 后继续下一个文件", delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::from_config(&PacingConfig::default())
    }
}
