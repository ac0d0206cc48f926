use std::future::Future;

use reqwest::{Client, StatusCode};

use crate::config::OsuConfig;
use crate::error::PipelineError;

use super::limiter::RateLimiter;
use super::models::{GameMode, RawOsuUser, SnapshotData};

/// 统计 API 的传输层（不含限速）
pub trait StatsTransport: Send + Sync {
    fn get_user(
        &self,
        player_id: &str,
        mode: GameMode,
    ) -> impl Future<Output = Result<SnapshotData, PipelineError>> + Send;
}

/// osu! API v1 实现
#[derive(Clone)]
pub struct OsuApi {
    client: Client,
    api_base: String,
    api_key: String,
}

impl OsuApi {
    pub fn new(client: Client, cfg: &OsuConfig) -> Self {
        Self {
            client,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
        }
    }
}

impl StatsTransport for OsuApi {
    async fn get_user(
        &self,
        player_id: &str,
        mode: GameMode,
    ) -> Result<SnapshotData, PipelineError> {
        let url = format!("{}/get_user", self.api_base);
        let mode_code = mode.api_code().to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("k", self.api_key.as_str()),
                ("u", player_id),
                ("m", mode_code.as_str()),
                ("type", "id"),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::RemoteRateLimited(format!(
                "get_user u={player_id} 返回 429"
            )));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(PipelineError::NotFound(format!("osu! 玩家 {player_id}")));
        }
        if !status.is_success() {
            return Err(PipelineError::RemoteUnavailable(format!(
                "get_user u={player_id} 返回 {status}"
            )));
        }

        let body = resp.bytes().await?;
        let users: Vec<RawOsuUser> = serde_json::from_slice(&body)?;
        let raw = users
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::NotFound(format!("osu! 玩家 {player_id} ({mode})")))?;
        SnapshotData::try_from(raw)
    }
}

/// 限速后的统计客户端：每次远程调用前都先获取令牌
pub struct StatsClient<T> {
    transport: T,
    limiter: RateLimiter,
}

impl<T: StatsTransport> StatsClient<T> {
    pub fn new(transport: T, limiter: RateLimiter) -> Self {
        Self { transport, limiter }
    }

    /// 抓取玩家在指定模式下的当前统计，不做持久化
    pub async fn fetch(
        &self,
        player_id: &str,
        mode: GameMode,
    ) -> Result<SnapshotData, PipelineError> {
        self.limiter.acquire().await;
        tracing::debug!("请求 osu! 统计: player={}, mode={}", player_id, mode);
        self.transport.get_user(player_id, mode).await
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}
