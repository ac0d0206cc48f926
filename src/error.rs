use thiserror::Error;

/// 流水线统一错误类型
#[derive(Error, Debug)]
pub enum PipelineError {
    /// 上游不可用（连接失败、超时、5xx）
    #[error("上游不可用: {0}")]
    RemoteUnavailable(String),

    /// 上游限流（HTTP 429）
    #[error("上游限流: {0}")]
    RemoteRateLimited(String),

    /// 实体不存在
    #[error("未找到: {0}")]
    NotFound(String),

    /// 数据格式错误
    #[error("数据格式错误: {0}")]
    Malformed(String),

    /// 持久化失败
    #[error("持久化失败: {0}")]
    PersistenceFailed(String),

    /// 社交平台凭据失效
    #[error("凭据无效: {0}")]
    CredentialsInvalid(String),

    /// 图像渲染错误
    #[error("图像渲染错误: {0}")]
    RenderFailed(String),

    /// 媒体上传失败
    #[error("媒体上传失败: {0}")]
    UploadFailed(String),

    /// 发布失败
    #[error("发布失败: {0}")]
    PublishFailed(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl PipelineError {
    /// 是否为暂时性的上游故障（下一个周期会自然重试）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::RemoteUnavailable(_) | PipelineError::RemoteRateLimited(_)
        )
    }

    /// 稳定的错误码，用于日志聚合
    pub fn stable_code(&self) -> &'static str {
        match self {
            PipelineError::RemoteUnavailable(_) => "REMOTE_UNAVAILABLE",
            PipelineError::RemoteRateLimited(_) => "REMOTE_RATE_LIMITED",
            PipelineError::NotFound(_) => "NOT_FOUND",
            PipelineError::Malformed(_) => "MALFORMED",
            PipelineError::PersistenceFailed(_) => "PERSISTENCE_FAILED",
            PipelineError::CredentialsInvalid(_) => "CREDENTIALS_INVALID",
            PipelineError::RenderFailed(_) => "RENDER_FAILED",
            PipelineError::UploadFailed(_) => "UPLOAD_FAILED",
            PipelineError::PublishFailed(_) => "PUBLISH_FAILED",
            PipelineError::Config(_) => "CONFIG_ERROR",
            PipelineError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

// =============== Error conversions for common external errors ===============

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PipelineError::RemoteUnavailable(format!("timeout: {err}"))
        } else if err.is_decode() {
            PipelineError::Malformed(err.to_string())
        } else if let Some(status) = err.status()
            && status.as_u16() == 429
        {
            PipelineError::RemoteRateLimited(err.to_string())
        } else {
            PipelineError::RemoteUnavailable(err.to_string())
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => PipelineError::NotFound(err.to_string()),
            other => PipelineError::PersistenceFailed(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Malformed(err.to_string())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::RenderFailed(err.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}
