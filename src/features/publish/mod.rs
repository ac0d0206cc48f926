/// 发布流程
pub mod publisher;
/// Twitter 客户端与平台抽象
pub mod twitter;

pub use publisher::{PublishOutcome, Publisher};
pub use twitter::{MediaHandle, PostId, SocialPlatform, TwitterClient};
