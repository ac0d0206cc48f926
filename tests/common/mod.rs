#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use prosu_poster::PipelineError;
use prosu_poster::config::{RenderConfig, SchedulerConfig};
use prosu_poster::features::image::{AvatarSource, RenderEngine};
use prosu_poster::features::osu::models::{HitCounts, Performance, ScoreTotals};
use prosu_poster::features::osu::{GameMode, RateLimiter, SnapshotData, StatsClient, StatsTransport};
use prosu_poster::features::publish::{MediaHandle, PostId, Publisher, SocialPlatform};
use prosu_poster::features::storage::{DocId, Document, DocumentStore, Filter};
use prosu_poster::features::users::models::{OsuSettings, TwitterAccount, TwitterProfile};
use prosu_poster::features::users::{Player, PostFrequency, User};
use prosu_poster::{Pipeline, Scheduler};
use serde_json::Value;

/// 内存文档存储，可注入写失败
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<Vec<(String, String, Value)>>,
    fail_writes: AtomicBool,
    counts: AtomicUsize,
}

impl MemoryStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// `count` 被调用的次数，每轮筛选至少一次
    pub fn count_queries(&self) -> usize {
        self.counts.load(Ordering::SeqCst)
    }

    fn put(docs: &mut Vec<(String, String, Value)>, collection: &str, id: &str, body: Value) {
        if let Some(slot) = docs
            .iter_mut()
            .find(|(c, i, _)| c == collection && i == id)
        {
            slot.2 = body;
        } else {
            docs.push((collection.to_string(), id.to_string(), body));
        }
    }

    fn check_writable(&self) -> Result<(), PipelineError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PipelineError::PersistenceFailed("injected write failure".into()));
        }
        Ok(())
    }

    fn matching<T: Document>(&self, filter: &Filter) -> Result<Vec<T>, PipelineError> {
        let docs = self.docs.lock().unwrap();
        docs.iter()
            .filter(|(c, _, body)| c == T::COLLECTION && filter.matches(body))
            .map(|(_, _, body)| Ok(serde_json::from_value(body.clone())?))
            .collect()
    }
}

impl DocumentStore for MemoryStore {
    async fn find_by_id<T: Document>(&self, id: &DocId) -> Result<T, PipelineError> {
        let docs = self.docs.lock().unwrap();
        let body = docs
            .iter()
            .find(|(c, i, _)| c == T::COLLECTION && i == id.as_str())
            .map(|(_, _, body)| body.clone())
            .ok_or_else(|| PipelineError::NotFound(format!("{}/{}", T::COLLECTION, id)))?;
        Ok(serde_json::from_value(body)?)
    }

    async fn find_one<T: Document>(&self, filter: &Filter) -> Result<T, PipelineError> {
        self.matching(filter)?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::NotFound(T::COLLECTION.to_string()))
    }

    async fn find<T: Document>(&self, filter: &Filter) -> Result<Vec<T>, PipelineError> {
        self.matching(filter)
    }

    async fn count<T: Document>(&self, filter: &Filter) -> Result<u64, PipelineError> {
        self.counts.fetch_add(1, Ordering::SeqCst);
        Ok(self.matching::<T>(filter)?.len() as u64)
    }

    async fn save<T: Document>(&self, doc: &T) -> Result<(), PipelineError> {
        self.check_writable()?;
        let body = serde_json::to_value(doc)?;
        let mut docs = self.docs.lock().unwrap();
        Self::put(&mut docs, T::COLLECTION, doc.id().as_str(), body);
        Ok(())
    }

    async fn save_pair<A: Document, B: Document>(
        &self,
        first: &A,
        second: &B,
    ) -> Result<(), PipelineError> {
        self.check_writable()?;
        let a = serde_json::to_value(first)?;
        let b = serde_json::to_value(second)?;
        let mut docs = self.docs.lock().unwrap();
        Self::put(&mut docs, A::COLLECTION, first.id().as_str(), a);
        Self::put(&mut docs, B::COLLECTION, second.id().as_str(), b);
        Ok(())
    }
}

/// 按 osu! id 返回预设统计；未预设的玩家返回 RemoteUnavailable
#[derive(Clone, Default)]
pub struct ScriptedStats {
    responses: Arc<Mutex<HashMap<String, SnapshotData>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedStats {
    pub fn respond(&self, osu_id: &str, data: SnapshotData) {
        self.responses
            .lock()
            .unwrap()
            .insert(osu_id.to_string(), data);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StatsTransport for ScriptedStats {
    async fn get_user(&self, player_id: &str, _mode: GameMode) -> Result<SnapshotData, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .get(player_id)
            .cloned()
            .ok_or_else(|| PipelineError::RemoteUnavailable(format!("no script for {player_id}")))
    }
}

/// 记录上传与发布调用的平台替身
#[derive(Clone)]
pub struct RecordingPlatform {
    valid: Arc<AtomicBool>,
    pub verifications: Arc<AtomicUsize>,
    pub uploads: Arc<AtomicUsize>,
    pub posts: Arc<Mutex<Vec<String>>>,
}

impl RecordingPlatform {
    pub fn new(valid: bool) -> Self {
        Self {
            valid: Arc::new(AtomicBool::new(valid)),
            verifications: Arc::default(),
            uploads: Arc::default(),
            posts: Arc::default(),
        }
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }
}

impl SocialPlatform for RecordingPlatform {
    async fn verify_credentials(&self, _account: &TwitterAccount) -> Result<bool, PipelineError> {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        Ok(self.valid.load(Ordering::SeqCst))
    }

    async fn upload_media(
        &self,
        _account: &TwitterAccount,
        png: &[u8],
    ) -> Result<MediaHandle, PipelineError> {
        assert!(png.starts_with(b"\x89PNG"), "upload must be a PNG");
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(MediaHandle(format!("media-{n}")))
    }

    async fn post(
        &self,
        _account: &TwitterAccount,
        caption: &str,
        _media: &MediaHandle,
    ) -> Result<PostId, PipelineError> {
        let mut posts = self.posts.lock().unwrap();
        posts.push(caption.to_string());
        Ok(PostId(format!("tweet-{}", posts.len())))
    }
}

/// 固定返回一张小 PNG 的头像源
#[derive(Clone)]
pub struct StaticAvatar {
    bytes: Arc<Vec<u8>>,
}

impl StaticAvatar {
    pub fn new() -> Self {
        Self {
            bytes: Arc::new(solid_png(16, 16, [200, 120, 40, 255])),
        }
    }
}

impl AvatarSource for StaticAvatar {
    async fn fetch_avatar(&self, _player_id: &str) -> Result<Vec<u8>, PipelineError> {
        Ok(self.bytes.as_ref().clone())
    }
}

pub fn solid_png(w: u32, h: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(w, h, image::Rgba(rgba));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("prosu-{tag}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// 带全部模式图标、空白国旗与 US 国旗的素材目录
pub fn asset_fixture() -> PathBuf {
    let root = temp_dir("assets");
    std::fs::create_dir_all(root.join("modes")).unwrap();
    std::fs::create_dir_all(root.join("flags")).unwrap();
    for mode in GameMode::ALL {
        std::fs::write(
            root.join("modes").join(mode.icon_file()),
            solid_png(8, 8, [255, 102, 170, 255]),
        )
        .unwrap();
    }
    std::fs::write(root.join("flags/__.png"), solid_png(6, 4, [90, 90, 90, 255])).unwrap();
    std::fs::write(root.join("flags/US.png"), solid_png(6, 4, [10, 40, 160, 255])).unwrap();
    root
}

pub fn render_config() -> RenderConfig {
    RenderConfig {
        assets_dir: asset_fixture().to_string_lossy().into_owned(),
        fonts_dir: temp_dir("fonts").to_string_lossy().into_owned(),
        optimize_speed: true,
        max_parallel: 2,
    }
}

pub fn stats(osu_id: &str, rank: u64, pp: f64, plays: u64) -> SnapshotData {
    SnapshotData {
        player_id: osu_id.to_string(),
        name: format!("player{osu_id}"),
        counts: HitCounts {
            count50: 10,
            count100: 100,
            count300: 1000,
            ss: 3,
            ssh: 1,
            s: 20,
            sh: 5,
            a: 40,
            plays,
        },
        scores: ScoreTotals {
            ranked: 1_000_000,
            total: 5_000_000,
        },
        pp: Performance {
            raw: pp,
            rank,
            country_rank: rank / 10,
        },
        country: "US".to_string(),
        level: 99.5,
        accuracy: 98.76,
    }
}

pub fn user_for(player: &Player, hour: u8, frequency: PostFrequency) -> User {
    User {
        id: DocId::generate(),
        osu_settings: OsuSettings {
            player: Some(player.id.clone()),
            mode: GameMode::Standard,
            enabled: true,
            hour_to_post: hour,
            post_frequency: frequency,
        },
        tweet_history: Vec::new(),
        twitter: TwitterAccount {
            token: "token".into(),
            token_secret: "secret".into(),
            profile: TwitterProfile {
                username: "someone".into(),
                display_name: "Someone".into(),
                id: "42".into(),
            },
        },
    }
}

pub type TestPipeline = Pipeline<MemoryStore, ScriptedStats, RecordingPlatform, StaticAvatar>;
pub type TestScheduler = Scheduler<MemoryStore, ScriptedStats, RecordingPlatform, StaticAvatar>;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub stats: ScriptedStats,
    pub platform: RecordingPlatform,
    pub scheduler: TestScheduler,
}

pub const CAPTION: &str = "osu! stats automatically generated by https://prosu.xyz";

pub fn harness(credentials_valid: bool) -> Harness {
    build_harness(credentials_valid, false)
}

/// 启动时立即执行一轮的调度器
pub fn startup_harness() -> Harness {
    build_harness(true, true)
}

fn build_harness(credentials_valid: bool, run_on_startup: bool) -> Harness {
    let store = Arc::new(MemoryStore::default());
    let stats = ScriptedStats::default();
    let platform = RecordingPlatform::new(credentials_valid);

    let client = StatsClient::new(stats.clone(), RateLimiter::new(6000, 100).unwrap());
    let renderer = RenderEngine::new(StaticAvatar::new(), &render_config());
    let publisher = Publisher::new(Arc::clone(&store), platform.clone(), CAPTION);
    let pipeline = Pipeline::new(Arc::clone(&store), client, renderer, publisher, 10_800);
    let scheduler = Scheduler::new(
        Arc::clone(&store),
        pipeline,
        SchedulerConfig {
            enabled: true,
            freshness_secs: 10_800,
            run_on_startup,
        },
    );

    Harness {
        store,
        stats,
        platform,
        scheduler,
    }
}

pub fn at(hour: u32, day: u32) -> DateTime<Utc> {
    use chrono::TimeZone;
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}
