/// 统一错误处理模块
pub mod error;

/// 配置模块
pub mod config;

/// 启动检查模块
pub mod startup;

/// 功能聚合模块
pub mod features;

/// 优雅退出管理模块
pub mod shutdown;

/// HTTP Client 复用工具
pub mod http;

// 导出常用类型供外部使用
pub use config::AppConfig;
pub use error::PipelineError;
pub use features::scheduler::{CycleReport, Pipeline, Scheduler, UserOutcome};
pub use shutdown::{ShutdownHandle, ShutdownManager, ShutdownReason};
