/// 用户与玩家文档
pub mod models;
/// 到期用户筛选
pub mod selector;

pub use models::{Player, PostFrequency, PublicationEvent, User};
pub use selector::{DueUserSelector, SkipReason, check_due};
