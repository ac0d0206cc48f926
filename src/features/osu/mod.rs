/// osu! 统计 API 客户端
pub mod client;
/// 出站限速器
pub mod limiter;
/// 玩家统计数据模型
pub mod models;

pub use client::{OsuApi, StatsClient, StatsTransport};
pub use limiter::RateLimiter;
pub use models::{GameMode, SnapshotData};
