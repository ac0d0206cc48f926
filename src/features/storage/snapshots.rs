use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::features::osu::{GameMode, SnapshotData};
use crate::features::users::models::Player;

use super::{DocId, Document, DocumentStore};

/// 一次抓取结果，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: DocId,
    /// 所属 Player 文档
    pub player: DocId,
    pub mode: GameMode,
    /// 抓取时间（unix 秒）
    pub date_checked: i64,
    pub data: SnapshotData,
}

impl Document for Snapshot {
    const COLLECTION: &'static str = "snapshots";

    fn id(&self) -> &DocId {
        &self.id
    }
}

/// 按 (player, mode) 追加的快照历史
pub struct SnapshotStore<S> {
    store: Arc<S>,
}

impl<S> Clone for SnapshotStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: DocumentStore> SnapshotStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// 写入新快照并把引用追加到 Player 对应模式的 checks 列表
    ///
    /// 两份文档在同一事务内保存。失败时 `player` 保持原样，返回 `PersistenceFailed`。
    pub async fn append(
        &self,
        player: &mut Player,
        mode: GameMode,
        data: SnapshotData,
        now: DateTime<Utc>,
    ) -> Result<DocId, PipelineError> {
        let checked_at = now.timestamp();
        let snapshot = Snapshot {
            id: DocId::generate(),
            player: player.id.clone(),
            mode,
            date_checked: checked_at,
            data,
        };

        let mut updated = player.clone();
        updated.push_check(mode, snapshot.id.clone(), checked_at);

        self.store
            .save_pair(&snapshot, &updated)
            .await
            .map_err(|e| match e {
                PipelineError::PersistenceFailed(_) => e,
                other => PipelineError::PersistenceFailed(other.to_string()),
            })?;

        *player = updated;
        tracing::debug!(
            "已记录快照 {} (player={}, mode={}, checks={})",
            snapshot.id,
            player.id,
            mode,
            player.checks(mode).len()
        );
        Ok(snapshot.id)
    }

    /// 该模式最近一次抓取
    pub fn latest(&self, player: &Player, mode: GameMode) -> Option<DocId> {
        player.latest_check(mode).cloned()
    }

    pub async fn get(&self, id: &DocId) -> Result<Snapshot, PipelineError> {
        self.store.find_by_id::<Snapshot>(id).await
    }

    /// 最近两次抓取（较早的在前），不足两次返回 `None`
    pub async fn last_two(
        &self,
        player: &Player,
        mode: GameMode,
    ) -> Result<Option<(Snapshot, Snapshot)>, PipelineError> {
        let checks = player.checks(mode);
        let [.., prev_id, curr_id] = checks else {
            return Ok(None);
        };
        let prev = self.get(prev_id).await?;
        let curr = self.get(curr_id).await?;
        Ok(Some((prev, curr)))
    }
}
