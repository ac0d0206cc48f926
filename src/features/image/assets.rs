use std::future::Future;
use std::io::Cursor;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use base64::{Engine as _, engine::general_purpose::STANDARD as base64_engine};
use image::ImageFormat;
use image::imageops::FilterType;
use lru::LruCache;
use reqwest::Client;

use crate::error::PipelineError;
use crate::features::osu::GameMode;

/// 找不到对应国家时使用的空白旗帜
pub const BLANK_FLAG: &str = "__";

/// 头像来源
pub trait AvatarSource: Send + Sync {
    /// 下载原始头像字节，任何失败都视为渲染失败
    fn fetch_avatar(
        &self,
        player_id: &str,
    ) -> impl Future<Output = Result<Vec<u8>, PipelineError>> + Send;
}

/// 通过 `{base_url}/{player_id}` 下载头像
#[derive(Clone)]
pub struct HttpAvatarSource {
    client: Client,
    base_url: String,
}

impl HttpAvatarSource {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl AvatarSource for HttpAvatarSource {
    async fn fetch_avatar(&self, player_id: &str) -> Result<Vec<u8>, PipelineError> {
        let url = format!("{}/{}", self.base_url, player_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::RenderFailed(format!("头像下载失败 {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(PipelineError::RenderFailed(format!(
                "头像下载失败 {url}: HTTP {}",
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| PipelineError::RenderFailed(format!("头像读取失败 {url}: {e}")))?;
        Ok(bytes.to_vec())
    }
}

// 预缩放图片 Data URI 缓存（键包含源路径与目标尺寸）
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct ScaledImageKey {
    path: PathBuf,
    w: u32,
    h: u32,
}

static SCALED_IMAGE_CACHE: OnceLock<Mutex<LruCache<ScaledImageKey, String>>> = OnceLock::new();
const SCALED_IMAGE_CACHE_SIZE: usize = 128;

fn get_scaled_image_cache() -> &'static Mutex<LruCache<ScaledImageKey, String>> {
    SCALED_IMAGE_CACHE.get_or_init(|| {
        Mutex::new(LruCache::new(
            NonZeroUsize::new(SCALED_IMAGE_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
        ))
    })
}

fn resize_filter(optimize_speed: bool) -> FilterType {
    if optimize_speed {
        FilterType::Triangle
    } else {
        FilterType::Lanczos3
    }
}

/// 解码任意格式图片，裁剪填充到目标尺寸后编码为 PNG Data URI
pub fn encode_data_uri(
    bytes: &[u8],
    target_w: u32,
    target_h: u32,
    optimize_speed: bool,
) -> Result<String, PipelineError> {
    let img = image::load_from_memory(bytes)?;
    let scaled = img.resize_to_fill(target_w, target_h, resize_filter(optimize_speed));
    let mut out = Cursor::new(Vec::new());
    scaled.write_to(&mut out, ImageFormat::Png)?;
    let b64 = base64_engine.encode(out.into_inner());
    Ok(format!("data:image/png;base64,{b64}"))
}

/// 磁盘图标（模式/旗帜）加载器
#[derive(Debug, Clone)]
pub struct AssetLibrary {
    root: PathBuf,
    optimize_speed: bool,
}

impl AssetLibrary {
    pub fn new(root: impl Into<PathBuf>, optimize_speed: bool) -> Self {
        Self {
            root: root.into(),
            optimize_speed,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode_icon_path(&self, mode: GameMode) -> PathBuf {
        self.root.join("modes").join(mode.icon_file())
    }

    /// 只接受两位字母的国家代码，其余一律指向空白旗帜
    pub fn flag_path(&self, country: &str) -> PathBuf {
        let code = if is_country_code(country) {
            country.to_ascii_uppercase()
        } else {
            BLANK_FLAG.to_string()
        };
        self.root.join("flags").join(format!("{code}.png"))
    }

    /// 模式图标（45x45）
    pub fn mode_icon_uri(&self, mode: GameMode) -> Result<String, PipelineError> {
        let path = self.mode_icon_path(mode);
        self.scaled_uri(&path, 45, 45)
            .map_err(|e| PipelineError::RenderFailed(format!("模式图标 {}: {e}", path.display())))
    }

    /// 国家旗帜（45x30），缺失时退回空白旗帜
    pub fn flag_uri(&self, country: &str) -> Result<String, PipelineError> {
        let path = self.flag_path(country);
        if is_country_code(country) && path.is_file() {
            match self.scaled_uri(&path, 45, 30) {
                Ok(uri) => return Ok(uri),
                Err(e) => tracing::error!("旗帜加载失败 '{}': {}", path.display(), e),
            }
        } else {
            tracing::error!("缺少国家旗帜: {:?}，使用空白旗帜", country);
        }

        let blank = self.flag_path(BLANK_FLAG);
        self.scaled_uri(&blank, 45, 30)
            .map_err(|e| PipelineError::RenderFailed(format!("空白旗帜 {}: {e}", blank.display())))
    }

    fn scaled_uri(&self, path: &Path, w: u32, h: u32) -> Result<String, PipelineError> {
        let key = ScaledImageKey {
            path: path.to_path_buf(),
            w,
            h,
        };
        if let Ok(mut cache) = get_scaled_image_cache().lock()
            && let Some(uri) = cache.get(&key)
        {
            return Ok(uri.clone());
        }

        let bytes = std::fs::read(path)?;
        let uri = encode_data_uri(&bytes, w, h, self.optimize_speed)?;
        if let Ok(mut cache) = get_scaled_image_cache().lock() {
            cache.put(key, uri.clone());
        }
        Ok(uri)
    }
}

fn is_country_code(country: &str) -> bool {
    country.len() == 2 && country.bytes().all(|b| b.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, w: u32, h: u32) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        image::RgbaImage::from_pixel(w, h, image::Rgba([200, 30, 30, 255]))
            .save(path)
            .unwrap();
    }

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("prosu-assets-{tag}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_country_falls_back_to_blank_flag() {
        let root = temp_root("flag");
        write_png(&root.join("flags").join("__.png"), 90, 60);
        let lib = AssetLibrary::new(&root, true);
        let uri = lib.flag_uri("zz").unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn country_must_be_two_letters_to_reach_a_flag_file() {
        let lib = AssetLibrary::new("/srv/assets", true);
        let blank = Path::new("/srv/assets/flags/__.png");
        assert_eq!(lib.flag_path("us"), Path::new("/srv/assets/flags/US.png"));
        assert_eq!(lib.flag_path("../modes/osu"), blank);
        assert_eq!(lib.flag_path("U/"), blank);
        assert_eq!(lib.flag_path(""), blank);

        let root = temp_root("escape");
        write_png(&root.join("flags").join("__.png"), 90, 60);
        write_png(&root.join("modes").join("osu.png"), 300, 300);
        let lib = AssetLibrary::new(&root, true);
        let escaped = lib.flag_uri("../modes/osu").unwrap();
        assert_eq!(escaped, lib.flag_uri("").unwrap());
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn missing_blank_flag_and_mode_icon_fail_render() {
        let root = temp_root("empty");
        let lib = AssetLibrary::new(&root, true);
        assert!(matches!(lib.flag_uri("US"), Err(PipelineError::RenderFailed(_))));
        assert!(matches!(
            lib.mode_icon_uri(GameMode::Taiko),
            Err(PipelineError::RenderFailed(_))
        ));
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn undecodable_bytes_are_render_failures() {
        assert!(matches!(
            encode_data_uri(b"not an image", 100, 100, false),
            Err(PipelineError::RenderFailed(_))
        ));
    }
}
