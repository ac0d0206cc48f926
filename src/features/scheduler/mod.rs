//! 小时调度
//!
//! 每到整点（UTC）筛选到期用户，为每个用户派生独立任务执行流水线。
//! 单个用户的失败只记录日志，不影响同一轮的其他用户。

use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::SchedulerConfig;
use crate::features::image::AvatarSource;
use crate::features::osu::StatsTransport;
use crate::features::publish::SocialPlatform;
use crate::features::storage::DocumentStore;
use crate::features::users::DueUserSelector;
use crate::shutdown::ShutdownHandle;

/// 单用户流水线
pub mod pipeline;

pub use pipeline::{CycleReport, Pipeline, UserOutcome};

/// 下一个整点
pub fn next_hour_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let next = (now.timestamp().div_euclid(3600) + 1) * 3600;
    DateTime::from_timestamp(next, 0).unwrap_or(now + chrono::Duration::hours(1))
}

/// 当前所在小时的整点，启动时补跑的一轮以它为时间戳
pub fn current_hour_start(now: DateTime<Utc>) -> DateTime<Utc> {
    next_hour_boundary(now) - chrono::Duration::hours(1)
}

pub struct Scheduler<S, T, P, A> {
    selector: DueUserSelector<S>,
    pipeline: Arc<Pipeline<S, T, P, A>>,
    config: SchedulerConfig,
}

impl<S, T, P, A> Scheduler<S, T, P, A>
where
    S: DocumentStore + 'static,
    T: StatsTransport + 'static,
    P: SocialPlatform + 'static,
    A: AvatarSource + 'static,
{
    pub fn new(store: Arc<S>, pipeline: Pipeline<S, T, P, A>, config: SchedulerConfig) -> Self {
        Self {
            selector: DueUserSelector::new(store),
            pipeline: Arc::new(pipeline),
            config,
        }
    }

    pub fn pipeline(&self) -> &Pipeline<S, T, P, A> {
        &self.pipeline
    }

    /// 执行一轮：筛选 → 每个用户一个任务 → 汇总
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::default();

        let due = match self.selector.select(now).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("筛选到期用户失败: {} ({})", e, e.stable_code());
                return report;
            }
        };
        report.selected = due.len();

        let mut tasks = JoinSet::new();
        for user_id in due {
            let pipeline = Arc::clone(&self.pipeline);
            let span = tracing::info_span!("user", user_id = %user_id);
            tasks.spawn(
                async move {
                    let result = pipeline.process_user(&user_id, now).await;
                    match &result {
                        Ok(outcome) => tracing::debug!("处理完成: {:?}", outcome),
                        Err(e) if e.is_transient() => {
                            tracing::warn!("处理失败（下一轮重试）: {} ({})", e, e.stable_code())
                        }
                        Err(e) => tracing::error!("处理失败: {} ({})", e, e.stable_code()),
                    }
                    result
                }
                .instrument(span),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(outcome)) => report.record(&outcome),
                Ok(Err(_)) => report.failed += 1,
                Err(e) => {
                    tracing::error!("用户任务异常退出: {}", e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "本轮完成: 选中={}, 发布={}, 新鲜={}, 首次={}, 凭据失效={}, 失败={}",
            report.selected,
            report.published,
            report.fresh,
            report.seeded,
            report.revoked,
            report.failed
        );
        report
    }

    /// 按整点驱动，直到收到退出信号
    ///
    /// 每轮在独立任务中执行；退出时只停止派发新一轮，
    /// 已在执行的轮次在 `drain_timeout` 内等待结束。
    pub async fn run(
        self: Arc<Self>,
        mut shutdown: ShutdownHandle,
        drain_timeout: std::time::Duration,
    ) {
        let mut cycles: JoinSet<CycleReport> = JoinSet::new();

        if self.config.run_on_startup {
            tracing::info!("启动时立即执行一轮");
            self.spawn_cycle(&mut cycles, current_hour_start(Utc::now()));
        }

        loop {
            if shutdown.is_shutting_down() {
                break;
            }
            let fire_at = next_hour_boundary(Utc::now());
            let wait = (fire_at - Utc::now()).to_std().unwrap_or_default();
            tracing::debug!("下一轮: {} ({:?} 后)", fire_at, wait);

            let fired = tokio::select! {
                _ = tokio::time::sleep(wait) => true,
                Some(joined) = cycles.join_next() => {
                    if let Err(e) = joined {
                        tracing::error!("调度轮次异常退出: {}", e);
                    }
                    false
                }
                reason = shutdown.wait() => {
                    tracing::info!("调度器收到退出信号: {:?}", reason);
                    break;
                }
            };
            if fired {
                self.spawn_cycle(&mut cycles, fire_at);
            }
        }

        if cycles.is_empty() {
            return;
        }
        tracing::info!("等待 {} 个进行中的轮次结束", cycles.len());
        let drained = shutdown
            .cleanup_with_timeout(
                async {
                    while cycles.join_next().await.is_some() {}
                },
                drain_timeout,
            )
            .await;
        if drained.is_err() {
            tracing::warn!("进行中的轮次未能在 {:?} 内结束，强制中止", drain_timeout);
            cycles.abort_all();
        }
    }

    fn spawn_cycle(self: &Arc<Self>, cycles: &mut JoinSet<CycleReport>, at: DateTime<Utc>) {
        tracing::info!("开始 {} 点的调度轮次", at.hour());
        let scheduler = Arc::clone(self);
        cycles.spawn(async move { scheduler.run_cycle(at).await });
    }
}
