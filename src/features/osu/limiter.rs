//! 统计 API 出站限速器（GCRA 令牌桶）
//!
//! 所有并发抓取任务共享同一个实例；`acquire` 只会延迟调用方，不会拒绝或报错。

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorRateLimiter};

use crate::config::OsuConfig;
use crate::error::PipelineError;

type DirectRateLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// 按"每分钟调用次数 + 突发容量"配置的共享令牌桶
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<DirectRateLimiter>,
    period: Duration,
    burst: u32,
}

impl RateLimiter {
    /// 以每分钟调用预算和突发容量构建限速器
    ///
    /// 补充周期 = 60s / calls_per_minute，桶容量 = burst。
    pub fn new(calls_per_minute: u32, burst: u32) -> Result<Self, PipelineError> {
        let cpm = NonZeroU32::new(calls_per_minute)
            .ok_or_else(|| PipelineError::Config("calls_per_minute 必须大于 0".to_string()))?;
        let burst_nz = NonZeroU32::new(burst)
            .ok_or_else(|| PipelineError::Config("burst 必须大于 0".to_string()))?;

        let period = Duration::from_secs(60) / cpm.get();
        let quota = Quota::with_period(period)
            .ok_or_else(|| PipelineError::Config(format!("无效的补充周期: {period:?}")))?
            .allow_burst(burst_nz);

        Ok(Self {
            inner: Arc::new(GovernorRateLimiter::direct(quota)),
            period,
            burst,
        })
    }

    pub fn from_config(cfg: &OsuConfig) -> Result<Self, PipelineError> {
        Self::new(cfg.calls_per_minute, cfg.burst)
    }

    /// 等待直到有可用令牌并消耗一个
    pub async fn acquire(&self) {
        self.inner.until_ready().await;
    }

    /// 单个令牌的补充周期
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("period", &self.period)
            .field("burst", &self.burst)
            .finish()
    }
}
