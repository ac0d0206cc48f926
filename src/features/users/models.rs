use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::features::osu::GameMode;
use crate::features::storage::{DocId, Document};

/// 发布频率
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostFrequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl PostFrequency {
    /// 两次发布之间的最小间隔（秒）
    pub fn throttle_secs(self) -> i64 {
        match self {
            PostFrequency::Daily => 86_400,
            PostFrequency::Weekly => 604_800,
            PostFrequency::Monthly => 2_419_200,
        }
    }
}

/// 用户的 osu! 相关设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsuSettings {
    /// 关联的 Player 文档
    #[serde(default)]
    pub player: Option<DocId>,
    pub mode: GameMode,
    #[serde(default)]
    pub enabled: bool,
    /// UTC 小时（0-23）
    #[serde(default)]
    pub hour_to_post: u8,
    #[serde(default)]
    pub post_frequency: PostFrequency,
}

/// 一次成功发布
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationEvent {
    /// unix 秒
    pub date_posted: i64,
    pub tweet_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwitterProfile {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub id: String,
}

/// 用户授权得到的 OAuth 1.0a access token
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwitterAccount {
    pub token: String,
    pub token_secret: String,
    #[serde(default)]
    pub profile: TwitterProfile,
}

/// 注册用户
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: DocId,
    pub osu_settings: OsuSettings,
    /// 按时间升序追加
    #[serde(default)]
    pub tweet_history: Vec<PublicationEvent>,
    pub twitter: TwitterAccount,
}

impl Document for User {
    const COLLECTION: &'static str = "users";

    fn id(&self) -> &DocId {
        &self.id
    }
}

impl User {
    /// 有效的 Player 引用（空字符串视为未设置）
    pub fn player_ref(&self) -> Option<&DocId> {
        self.osu_settings.player.as_ref().filter(|p| !p.is_empty())
    }

    pub fn last_publication(&self) -> Option<&PublicationEvent> {
        self.tweet_history.last()
    }

    /// 追加发布记录
    pub fn record_publication(&mut self, date_posted: i64, tweet_id: impl Into<String>) {
        self.tweet_history.push(PublicationEvent {
            date_posted,
            tweet_id: tweet_id.into(),
        });
    }
}

/// osu! 玩家及其各模式的抓取历史
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: DocId,
    /// osu! 站内 user id
    pub osu_id: String,
    pub name: String,
    /// 最近一次记录抓取的时间（unix 秒）
    #[serde(default)]
    pub last_checked: i64,
    /// 模式 -> 按抓取时间排列的 Snapshot 引用
    #[serde(default)]
    pub modes: BTreeMap<GameMode, Vec<DocId>>,
}

impl Document for Player {
    const COLLECTION: &'static str = "players";

    fn id(&self) -> &DocId {
        &self.id
    }
}

impl Player {
    pub fn new(osu_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: DocId::generate(),
            osu_id: osu_id.into(),
            name: name.into(),
            last_checked: 0,
            modes: BTreeMap::new(),
        }
    }

    pub fn checks(&self, mode: GameMode) -> &[DocId] {
        self.modes.get(&mode).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn latest_check(&self, mode: GameMode) -> Option<&DocId> {
        self.checks(mode).last()
    }

    pub(crate) fn push_check(&mut self, mode: GameMode, snapshot: DocId, checked_at: i64) {
        self.modes.entry(mode).or_default().push(snapshot);
        self.last_checked = checked_at;
    }
}
