use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::error::PipelineError;
use crate::features::image::{AvatarSource, RenderEngine, RenderRequest};
use crate::features::osu::{GameMode, StatsClient, StatsTransport};
use crate::features::publish::{PostId, PublishOutcome, Publisher, SocialPlatform};
use crate::features::storage::{DocId, DocumentStore, SnapshotStore};
use crate::features::users::{Player, User};

/// 单个用户一次处理的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserOutcome {
    Published { post_id: PostId },
    /// 最近一次抓取仍在新鲜期内，什么都没做
    Fresh,
    /// 已记录快照，但历史不足两次，未渲染
    Seeded,
    CredentialsRevoked,
}

/// 一轮调度的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub selected: usize,
    pub published: usize,
    pub fresh: usize,
    pub seeded: usize,
    pub revoked: usize,
    pub failed: usize,
}

impl CycleReport {
    pub fn record(&mut self, outcome: &UserOutcome) {
        match outcome {
            UserOutcome::Published { .. } => self.published += 1,
            UserOutcome::Fresh => self.fresh += 1,
            UserOutcome::Seeded => self.seeded += 1,
            UserOutcome::CredentialsRevoked => self.revoked += 1,
        }
    }
}

/// 抓取阶段的结果
enum Recorded {
    /// 已有可用的最新快照，继续渲染
    Ready(Player),
    Done(UserOutcome),
}

/// 单用户流水线：抓取 → 记录 → 渲染 → 发布
///
/// 多个用户可能追踪同一个 Player。抓取与记录按 Player 串行，
/// 同一轮内只抓取一次，其余用户直接使用这次的快照。
pub struct Pipeline<S, T, P, A> {
    store: Arc<S>,
    player_locks: Mutex<HashMap<DocId, Arc<tokio::sync::Mutex<()>>>>,
    snapshots: SnapshotStore<S>,
    stats: StatsClient<T>,
    renderer: RenderEngine<A>,
    publisher: Publisher<S, P>,
    freshness_secs: i64,
}

impl<S, T, P, A> Pipeline<S, T, P, A>
where
    S: DocumentStore,
    T: StatsTransport,
    P: SocialPlatform,
    A: AvatarSource,
{
    pub fn new(
        store: Arc<S>,
        stats: StatsClient<T>,
        renderer: RenderEngine<A>,
        publisher: Publisher<S, P>,
        freshness_secs: i64,
    ) -> Self {
        Self {
            snapshots: SnapshotStore::new(Arc::clone(&store)),
            store,
            player_locks: Mutex::new(HashMap::new()),
            stats,
            renderer,
            publisher,
            freshness_secs,
        }
    }

    pub fn snapshots(&self) -> &SnapshotStore<S> {
        &self.snapshots
    }

    pub async fn process_user(
        &self,
        user_id: &DocId,
        now: DateTime<Utc>,
    ) -> Result<UserOutcome, PipelineError> {
        let mut user: User = self.store.find_by_id(user_id).await?;
        let player_id = user
            .player_ref()
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(format!("用户 {user_id} 未绑定 osu! 玩家")))?;
        let mode = user.osu_settings.mode;

        let lock = self.player_lock(&player_id);
        let recorded = {
            let _guard = lock.lock().await;
            self.record_if_stale(&player_id, mode, now).await
        };
        self.release_player_lock(&player_id, lock);
        let player = match recorded? {
            Recorded::Ready(player) => player,
            Recorded::Done(outcome) => return Ok(outcome),
        };

        let Some((prev, curr)) = self.snapshots.last_two(&player, mode).await? else {
            return Ok(UserOutcome::Seeded);
        };

        tracing::debug!("Rendering: {} -> {}", prev.id, curr.id);
        let request = RenderRequest {
            player_name: if curr.data.name.is_empty() {
                player.name.clone()
            } else {
                curr.data.name.clone()
            },
            player_osu_id: player.osu_id.clone(),
            country: curr.data.country.clone(),
            mode,
            prev,
            curr,
        };
        let image = self.renderer.render(&request).await?;

        tracing::debug!("Publishing: {} bytes", image.png.len());
        match self.publisher.publish(&mut user, &image, now).await? {
            PublishOutcome::Posted { post_id } => Ok(UserOutcome::Published { post_id }),
            PublishOutcome::CredentialsRevoked => Ok(UserOutcome::CredentialsRevoked),
        }
    }

    /// 在持有 Player 锁时调用：读取最新的 Player 文档，按新鲜期决定是否抓取
    async fn record_if_stale(
        &self,
        player_id: &DocId,
        mode: GameMode,
        now: DateTime<Utc>,
    ) -> Result<Recorded, PipelineError> {
        let mut player: Player = self.store.find_by_id(player_id).await?;

        let Some(latest_id) = self.snapshots.latest(&player, mode) else {
            tracing::debug!("首次抓取 player={} mode={}", player.osu_id, mode);
            self.fetch_and_record(&mut player, mode, now).await?;
            return Ok(Recorded::Done(UserOutcome::Seeded));
        };

        let latest = self.snapshots.get(&latest_id).await?;
        if latest.date_checked == now.timestamp() {
            tracing::debug!("本轮已抓取过 player={}，复用快照 {}", player.osu_id, latest.id);
            return Ok(Recorded::Ready(player));
        }

        let age = now.timestamp() - latest.date_checked;
        if age <= self.freshness_secs {
            tracing::debug!("最近一次抓取在 {}s 前，跳过", age);
            return Ok(Recorded::Done(UserOutcome::Fresh));
        }

        self.fetch_and_record(&mut player, mode, now).await?;
        Ok(Recorded::Ready(player))
    }

    fn player_lock(&self, player_id: &DocId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .player_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(player_id.clone()).or_default())
    }

    /// 没有其他任务等待时移除锁
    fn release_player_lock(&self, player_id: &DocId, lock: Arc<tokio::sync::Mutex<()>>) {
        drop(lock);
        let mut locks = self
            .player_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks
            .get(player_id)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            locks.remove(player_id);
        }
    }

    async fn fetch_and_record(
        &self,
        player: &mut Player,
        mode: GameMode,
        now: DateTime<Utc>,
    ) -> Result<DocId, PipelineError> {
        tracing::debug!("Fetching: player={} mode={}", player.osu_id, mode);
        let data = self.stats.fetch(&player.osu_id, mode).await?;

        tracing::debug!("Recording: player={}", player.id);
        self.snapshots.append(player, mode, data, now).await
    }
}
