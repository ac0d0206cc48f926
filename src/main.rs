use std::sync::Arc;
use std::time::Duration;

use prosu_poster::features::image::{HttpAvatarSource, RenderEngine};
use prosu_poster::features::osu::{OsuApi, RateLimiter, StatsClient};
use prosu_poster::features::publish::{Publisher, TwitterClient};
use prosu_poster::features::storage::SqliteDocumentStore;
use prosu_poster::startup::run_startup_checks;
use prosu_poster::{AppConfig, Pipeline, PipelineError, Scheduler, ShutdownManager, http};

#[tokio::main]
async fn main() {
    // 配置先于日志加载，日志级别取自配置
    let loaded = AppConfig::init_global();
    let directive = match &loaded {
        Ok(()) => AppConfig::global().logging.default_directive(),
        Err(_) => "prosu_poster=info".to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| directive.into()),
        )
        .init();

    if let Err(e) = loaded {
        tracing::error!("Config init failed: {}", e);
        std::process::exit(1);
    }
    let config = AppConfig::global();

    let shutdown_manager = ShutdownManager::new();
    if let Err(e) = shutdown_manager.start_signal_handler().await {
        tracing::error!("信号处理器启动失败: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run_startup_checks(config).await {
        tracing::error!("Startup checks failed: {}", e);
        std::process::exit(1);
    }

    let scheduler = match build_scheduler(config).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("流水线初始化失败: {} ({})", e, e.stable_code());
            std::process::exit(1);
        }
    };

    if !config.scheduler.enabled {
        tracing::warn!("调度器已禁用 (scheduler.enabled = false)，等待退出信号");
        let reason = shutdown_manager.wait_for_shutdown().await;
        tracing::info!("接收到退出信号: {:?}", reason);
        return;
    }

    tracing::info!(
        "调度器已启动: osu! 限速 {}/min (burst {}), 新鲜期 {}s",
        config.osu.calls_per_minute,
        config.osu.burst,
        config.scheduler.freshness_secs
    );

    let drain_timeout = config.shutdown.timeout_duration();
    let handle = shutdown_manager.handle();
    let runner = tokio::spawn(Arc::clone(&scheduler).run(handle, drain_timeout));

    let reason = shutdown_manager.wait_for_shutdown().await;
    tracing::info!("接收到退出信号: {:?}，开始优雅退出...", reason);

    // 额外留出余量给调度器自身的收尾
    match tokio::time::timeout(drain_timeout + Duration::from_secs(1), runner).await {
        Ok(Ok(())) => tracing::info!("优雅退出完成"),
        Ok(Err(e)) => tracing::error!("调度任务异常退出: {}", e),
        Err(_) => tracing::warn!("优雅退出超时，强制退出"),
    }
}

type ProductionScheduler = Scheduler<SqliteDocumentStore, OsuApi, TwitterClient, HttpAvatarSource>;

async fn build_scheduler(config: &AppConfig) -> Result<ProductionScheduler, PipelineError> {
    let store = Arc::new(
        SqliteDocumentStore::open(&config.storage.sqlite_path, config.storage.sqlite_wal).await?,
    );
    tracing::info!("SQLite 存储: {}", config.storage.sqlite_path);

    let osu_client = http::build_client(Duration::from_secs(config.osu.timeout_secs))?;
    let stats = StatsClient::new(
        OsuApi::new(osu_client, &config.osu),
        RateLimiter::from_config(&config.osu)?,
    );

    let avatars = HttpAvatarSource::new(http::client_timeout_30s()?.clone(), &config.avatar.base_url);
    let renderer = RenderEngine::new(avatars, &config.render);

    let twitter = TwitterClient::new(http::client_timeout_90s()?.clone(), &config.twitter);
    let publisher = Publisher::new(Arc::clone(&store), twitter, config.twitter.caption.clone());

    let pipeline = Pipeline::new(
        Arc::clone(&store),
        stats,
        renderer,
        publisher,
        config.scheduler.freshness_secs,
    );
    Ok(Scheduler::new(store, pipeline, config.scheduler.clone()))
}
