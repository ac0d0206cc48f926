use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::PipelineError;
use crate::features::image::RenderedImage;
use crate::features::storage::DocumentStore;
use crate::features::users::models::User;

use super::twitter::{PostId, SocialPlatform};

/// 一次发布尝试的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Posted { post_id: PostId },
    /// 凭据已失效，用户的自动发布已关闭
    CredentialsRevoked,
}

/// 校验凭据、上传图片、发布并记录历史
pub struct Publisher<S, P> {
    store: Arc<S>,
    platform: P,
    caption: String,
}

impl<S: DocumentStore, P: SocialPlatform> Publisher<S, P> {
    pub fn new(store: Arc<S>, platform: P, caption: impl Into<String>) -> Self {
        Self {
            store,
            platform,
            caption: caption.into(),
        }
    }

    pub async fn publish(
        &self,
        user: &mut User,
        image: &RenderedImage,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome, PipelineError> {
        if !self.platform.verify_credentials(&user.twitter).await? {
            self.revoke(user).await?;
            return Ok(PublishOutcome::CredentialsRevoked);
        }

        let media = self.platform.upload_media(&user.twitter, &image.png).await?;
        let post_id = self.platform.post(&user.twitter, &self.caption, &media).await?;

        let mut updated = user.clone();
        updated.record_publication(now.timestamp(), post_id.0.clone());
        self.store.save(&updated).await.map_err(|e| {
            PipelineError::PersistenceFailed(format!(
                "推文 {post_id} 已发布但历史保存失败: {e}"
            ))
        })?;
        *user = updated;

        tracing::info!(
            "已发布: user={}, https://twitter.com/{}/status/{}",
            user.id,
            user.twitter.profile.username,
            post_id
        );
        Ok(PublishOutcome::Posted { post_id })
    }

    /// 关闭用户的自动发布并持久化
    async fn revoke(&self, user: &mut User) -> Result<(), PipelineError> {
        let reason = PipelineError::CredentialsInvalid(user.id.to_string());
        tracing::warn!("{}，关闭自动发布 ({})", reason, reason.stable_code());

        let mut updated = user.clone();
        updated.osu_settings.enabled = false;
        self.store.save(&updated).await?;
        *user = updated;
        Ok(())
    }
}
