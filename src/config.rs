use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 全局配置单例
static CONFIG: OnceCell<AppConfig> = OnceCell::new();

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（未设置 RUST_LOG 时生效）
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    /// 组装 EnvFilter 使用的默认指令
    pub fn default_directive(&self) -> String {
        format!("prosu_poster={}", self.level)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 文档存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite 文件路径
    #[serde(default = "StorageConfig::default_sqlite_path")]
    pub sqlite_path: String,
    /// 是否启用 WAL
    #[serde(default = "StorageConfig::default_sqlite_wal")]
    pub sqlite_wal: bool,
}

impl StorageConfig {
    fn default_sqlite_path() -> String {
        "./resources/prosu.db".to_string()
    }
    fn default_sqlite_wal() -> bool {
        true
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: Self::default_sqlite_path(),
            sqlite_wal: Self::default_sqlite_wal(),
        }
    }
}

/// osu! 统计 API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsuConfig {
    /// API 基地址（v1）
    #[serde(default = "OsuConfig::default_api_base")]
    pub api_base: String,
    /// API Key
    #[serde(default)]
    pub api_key: String,
    /// 每分钟允许的调用次数
    #[serde(default = "OsuConfig::default_calls_per_minute")]
    pub calls_per_minute: u32,
    /// 令牌桶容量（允许的突发调用数）
    #[serde(default = "OsuConfig::default_burst")]
    pub burst: u32,
    /// 单次请求超时（秒）
    #[serde(default = "OsuConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl OsuConfig {
    fn default_api_base() -> String {
        "https://osu.ppy.sh/api".to_string()
    }
    fn default_calls_per_minute() -> u32 {
        250
    }
    fn default_burst() -> u32 {
        10
    }
    fn default_timeout() -> u64 {
        30
    }
}

impl Default for OsuConfig {
    fn default() -> Self {
        Self {
            api_base: Self::default_api_base(),
            api_key: String::new(),
            calls_per_minute: Self::default_calls_per_minute(),
            burst: Self::default_burst(),
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// 头像来源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarConfig {
    /// 头像基地址，请求 `{base_url}/{player_id}`
    #[serde(default = "AvatarConfig::default_base_url")]
    pub base_url: String,
}

impl AvatarConfig {
    fn default_base_url() -> String {
        "https://a.ppy.sh".to_string()
    }
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
        }
    }
}

/// Twitter 发布配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitterConfig {
    /// REST API 基地址
    #[serde(default = "TwitterConfig::default_api_base")]
    pub api_base: String,
    /// 媒体上传基地址
    #[serde(default = "TwitterConfig::default_upload_base")]
    pub upload_base: String,
    /// 应用 consumer key
    #[serde(default)]
    pub consumer_key: String,
    /// 应用 consumer secret
    #[serde(default)]
    pub consumer_secret: String,
    /// 推文正文
    #[serde(default = "TwitterConfig::default_caption")]
    pub caption: String,
}

impl TwitterConfig {
    fn default_api_base() -> String {
        "https://api.twitter.com/1.1".to_string()
    }
    fn default_upload_base() -> String {
        "https://upload.twitter.com/1.1".to_string()
    }
    fn default_caption() -> String {
        "osu! stats automatically generated by https://prosu.xyz".to_string()
    }
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            api_base: Self::default_api_base(),
            upload_base: Self::default_upload_base(),
            consumer_key: String::new(),
            consumer_secret: String::new(),
            caption: Self::default_caption(),
        }
    }
}

/// 图片渲染配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// 静态素材目录（modes/ 与 flags/）
    #[serde(default = "RenderConfig::default_assets_dir")]
    pub assets_dir: String,
    /// 自定义字体目录
    #[serde(default = "RenderConfig::default_fonts_dir")]
    pub fonts_dir: String,
    /// 是否优先速度渲染（OptimizeSpeed），提升栅格化性能，可能略降画质
    #[serde(default)]
    pub optimize_speed: bool,
    /// 并发渲染许可数（0=自动，取 CPU 核心数）
    #[serde(default)]
    pub max_parallel: u32,
}

impl RenderConfig {
    fn default_assets_dir() -> String {
        "./assets".to_string()
    }
    fn default_fonts_dir() -> String {
        "./resources/fonts".to_string()
    }

    /// 实际生效的并发渲染许可数
    pub fn effective_parallelism(&self) -> usize {
        match self.max_parallel as usize {
            0 => num_cpus::get(),
            m => m,
        }
    }

    pub fn assets_path(&self) -> PathBuf {
        PathBuf::from(&self.assets_dir)
    }

    pub fn fonts_path(&self) -> PathBuf {
        PathBuf::from(&self.fonts_dir)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            assets_dir: Self::default_assets_dir(),
            fonts_dir: Self::default_fonts_dir(),
            optimize_speed: false,
            max_parallel: 0,
        }
    }
}

/// 调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 是否启用整点调度
    #[serde(default = "SchedulerConfig::default_enabled")]
    pub enabled: bool,
    /// 新鲜度阈值（秒）：最近一次抓取距今不超过该值则跳过
    #[serde(default = "SchedulerConfig::default_freshness")]
    pub freshness_secs: i64,
    /// 启动后是否立即执行一轮
    #[serde(default)]
    pub run_on_startup: bool,
}

impl SchedulerConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_freshness() -> i64 {
        3 * 60 * 60
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            freshness_secs: Self::default_freshness(),
            run_on_startup: false,
        }
    }
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 优雅退出超时时间（秒）
    #[serde(default = "ShutdownConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    fn default_timeout() -> u64 {
        30
    }

    /// 获取优雅退出超时时间
    pub fn timeout_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub osu: OsuConfig,
    #[serde(default)]
    pub avatar: AvatarConfig,
    #[serde(default)]
    pub twitter: TwitterConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// 从配置文件加载配置，支持环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path();

        tracing::info!("正在从 {:?} 加载配置文件", config_path);

        let builder = ConfigBuilder::builder()
            // 配置文件可缺省，全部字段都有默认值
            .add_source(File::from(config_path).required(false))
            // 支持环境变量覆盖，例如：APP_OSU_API_KEY
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = builder.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            "配置加载完成: calls_per_minute = {}, burst = {}, sqlite = {}",
            config.osu.calls_per_minute,
            config.osu.burst,
            config.storage.sqlite_path
        );

        Ok(config)
    }

    /// 校验会导致流水线无法工作的配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.osu.api_key.trim().is_empty() {
            return Err(ConfigError::Message("osu.api_key 不能为空".to_string()));
        }
        if self.osu.calls_per_minute == 0 {
            return Err(ConfigError::Message(
                "osu.calls_per_minute 必须大于 0".to_string(),
            ));
        }
        if self.osu.burst == 0 {
            return Err(ConfigError::Message("osu.burst 必须大于 0".to_string()));
        }
        if self.scheduler.freshness_secs < 0 {
            return Err(ConfigError::Message(
                "scheduler.freshness_secs 不能为负数".to_string(),
            ));
        }
        if self.twitter.consumer_key.is_empty() || self.twitter.consumer_secret.is_empty() {
            tracing::warn!("twitter consumer key/secret 未配置，发布将失败");
        }
        Ok(())
    }

    /// 获取全局配置单例
    pub fn global() -> &'static AppConfig {
        CONFIG.get().expect("配置未初始化，请先调用 init_global()")
    }

    /// 初始化全局配置
    pub fn init_global() -> Result<(), ConfigError> {
        let config = Self::load()?;
        CONFIG
            .set(config)
            .map_err(|_| ConfigError::Message("配置已经被初始化".to_string()))?;
        Ok(())
    }

    /// 获取配置文件路径
    fn get_config_path() -> PathBuf {
        std::env::var("PROSU_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"))
    }
}
