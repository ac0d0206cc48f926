/// 对比图渲染
pub mod image;
/// osu! 统计抓取与限速
pub mod osu;
/// 社交平台发布
pub mod publish;
/// 小时调度与单用户流水线
pub mod scheduler;
/// 文档存储与快照历史
pub mod storage;
/// 用户、玩家与到期筛选
pub mod users;
