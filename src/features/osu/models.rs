use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// 游戏模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Standard,
    Taiko,
    Ctb,
    Mania,
}

impl GameMode {
    pub const ALL: [GameMode; 4] = [
        GameMode::Standard,
        GameMode::Taiko,
        GameMode::Ctb,
        GameMode::Mania,
    ];

    /// osu! API v1 的 `m` 参数
    pub fn api_code(self) -> u8 {
        match self {
            GameMode::Standard => 0,
            GameMode::Taiko => 1,
            GameMode::Ctb => 2,
            GameMode::Mania => 3,
        }
    }

    /// 展示名称
    pub fn label(self) -> &'static str {
        match self {
            GameMode::Standard => "osu!standard",
            GameMode::Taiko => "osu!taiko",
            GameMode::Ctb => "osu!catch",
            GameMode::Mania => "osu!mania",
        }
    }

    /// 模式图标文件名（位于 `assets/modes/`）
    pub fn icon_file(self) -> &'static str {
        match self {
            GameMode::Standard => "osu.png",
            GameMode::Taiko => "taiko.png",
            GameMode::Ctb => "ctb.png",
            GameMode::Mania => "mania.png",
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for GameMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "osu" | "osu!standard" | "0" => Ok(GameMode::Standard),
            "taiko" | "osu!taiko" | "1" => Ok(GameMode::Taiko),
            "ctb" | "catch" | "osu!catch" | "2" => Ok(GameMode::Ctb),
            "mania" | "osu!mania" | "3" => Ok(GameMode::Mania),
            other => Err(PipelineError::Malformed(format!("未知游戏模式: {other}"))),
        }
    }
}

/// 各评级/判定计数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitCounts {
    pub count50: u64,
    pub count100: u64,
    pub count300: u64,
    pub ss: u64,
    pub ssh: u64,
    pub s: u64,
    pub sh: u64,
    pub a: u64,
    pub plays: u64,
}

/// 总分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScoreTotals {
    pub ranked: u64,
    pub total: u64,
}

/// PP 与排名
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    pub raw: f64,
    pub rank: u64,
    pub country_rank: u64,
}

/// 一次抓取得到的玩家统计
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotData {
    pub player_id: String,
    pub name: String,
    pub counts: HitCounts,
    pub scores: ScoreTotals,
    pub pp: Performance,
    pub country: String,
    pub level: f64,
    pub accuracy: f64,
}

/// osu! API v1 `get_user` 原始响应（数值字段均为字符串，不活跃玩家会返回 null）
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawOsuUser {
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub count300: Option<String>,
    pub count100: Option<String>,
    pub count50: Option<String>,
    pub playcount: Option<String>,
    pub ranked_score: Option<String>,
    pub total_score: Option<String>,
    pub pp_rank: Option<String>,
    pub level: Option<String>,
    pub pp_raw: Option<String>,
    pub accuracy: Option<String>,
    pub count_rank_ss: Option<String>,
    pub count_rank_ssh: Option<String>,
    pub count_rank_s: Option<String>,
    pub count_rank_sh: Option<String>,
    pub count_rank_a: Option<String>,
    pub country: Option<String>,
    pub pp_country_rank: Option<String>,
}

fn parse_u64(field: &str, raw: Option<&str>) -> Result<u64, PipelineError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(0),
        Some(v) => v
            .parse::<u64>()
            .map_err(|e| PipelineError::Malformed(format!("字段 {field}={v:?}: {e}"))),
    }
}

fn parse_f64(field: &str, raw: Option<&str>) -> Result<f64, PipelineError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(0.0),
        Some(v) => match v.parse::<f64>() {
            Ok(x) if x.is_finite() => Ok(x),
            Ok(x) => Err(PipelineError::Malformed(format!("字段 {field} 非有限数: {x}"))),
            Err(e) => Err(PipelineError::Malformed(format!("字段 {field}={v:?}: {e}"))),
        },
    }
}

impl TryFrom<RawOsuUser> for SnapshotData {
    type Error = PipelineError;

    fn try_from(raw: RawOsuUser) -> Result<Self, Self::Error> {
        let player_id = raw
            .user_id
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| PipelineError::Malformed("缺少 user_id".to_string()))?;
        let name = raw
            .username
            .ok_or_else(|| PipelineError::Malformed("缺少 username".to_string()))?;

        Ok(SnapshotData {
            player_id,
            name,
            counts: HitCounts {
                count50: parse_u64("count50", raw.count50.as_deref())?,
                count100: parse_u64("count100", raw.count100.as_deref())?,
                count300: parse_u64("count300", raw.count300.as_deref())?,
                ss: parse_u64("count_rank_ss", raw.count_rank_ss.as_deref())?,
                ssh: parse_u64("count_rank_ssh", raw.count_rank_ssh.as_deref())?,
                s: parse_u64("count_rank_s", raw.count_rank_s.as_deref())?,
                sh: parse_u64("count_rank_sh", raw.count_rank_sh.as_deref())?,
                a: parse_u64("count_rank_a", raw.count_rank_a.as_deref())?,
                plays: parse_u64("playcount", raw.playcount.as_deref())?,
            },
            scores: ScoreTotals {
                ranked: parse_u64("ranked_score", raw.ranked_score.as_deref())?,
                total: parse_u64("total_score", raw.total_score.as_deref())?,
            },
            pp: Performance {
                raw: parse_f64("pp_raw", raw.pp_raw.as_deref())?,
                rank: parse_u64("pp_rank", raw.pp_rank.as_deref())?,
                country_rank: parse_u64("pp_country_rank", raw.pp_country_rank.as_deref())?,
            },
            country: raw.country.unwrap_or_default().to_ascii_uppercase(),
            level: parse_f64("level", raw.level.as_deref())?,
            accuracy: parse_f64("accuracy", raw.accuracy.as_deref())?,
        })
    }
}
