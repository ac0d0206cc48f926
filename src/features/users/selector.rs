use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};

use crate::error::PipelineError;
use crate::features::storage::{DocId, DocumentStore, Filter};

use super::models::User;

/// 用户在本轮被跳过的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    /// 发布时间不是当前小时
    OtherHour { hour_to_post: u8 },
    /// 未绑定 osu! 玩家
    NoPlayer,
    /// 距上次发布未满频率窗口
    Throttled { remaining_secs: i64 },
}

/// 判断用户在 `now` 是否应当处理
pub fn check_due(user: &User, now: DateTime<Utc>) -> Result<(), SkipReason> {
    let settings = &user.osu_settings;
    if !settings.enabled {
        return Err(SkipReason::Disabled);
    }
    if u32::from(settings.hour_to_post) != now.hour() {
        return Err(SkipReason::OtherHour {
            hour_to_post: settings.hour_to_post,
        });
    }
    if user.player_ref().is_none() {
        return Err(SkipReason::NoPlayer);
    }
    if let Some(last) = user.last_publication() {
        let elapsed = now.timestamp() - last.date_posted;
        let window = settings.post_frequency.throttle_secs();
        if elapsed < window {
            return Err(SkipReason::Throttled {
                remaining_secs: window - elapsed,
            });
        }
    }
    Ok(())
}

/// 按计划时间与频率窗口筛选本轮需要处理的用户
pub struct DueUserSelector<S> {
    store: Arc<S>,
}

impl<S: DocumentStore> DueUserSelector<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// 返回去重后的用户 id（按存储顺序）
    pub async fn select(&self, now: DateTime<Utc>) -> Result<Vec<DocId>, PipelineError> {
        let filter = Filter::new()
            .field("osuSettings.hourToPost", now.hour())
            .field("osuSettings.enabled", true);

        let candidates = self.store.count::<User>(&filter).await?;
        tracing::info!("{} 点的候选用户数: {}", now.hour(), candidates);

        let users: Vec<User> = self.store.find(&filter).await?;
        let mut seen = HashSet::with_capacity(users.len());
        let mut due = Vec::new();
        for user in users {
            match check_due(&user, now) {
                Ok(()) => {
                    if seen.insert(user.id.clone()) {
                        due.push(user.id);
                    }
                }
                Err(reason) => {
                    tracing::debug!("跳过用户 {}: {:?}", user.id, reason);
                }
            }
        }

        tracing::info!("本轮待处理用户数: {}", due.len());
        Ok(due)
    }
}
