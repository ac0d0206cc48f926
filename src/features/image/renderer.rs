use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use chrono::DateTime;
use resvg::usvg::{self, Options as UsvgOptions, fontdb};
use resvg::{
    render,
    tiny_skia::{Pixmap, Transform},
};
use tokio::sync::Semaphore;
use tokio::task::spawn_blocking;
use unicode_width::UnicodeWidthChar;

use crate::config::RenderConfig;
use crate::error::PipelineError;
use crate::features::osu::GameMode;
use crate::features::storage::Snapshot;

use super::assets::{AssetLibrary, AvatarSource, encode_data_uri};
use super::delta::{Direction, Metric, metric_rows};

pub const CARD_WIDTH: u32 = 440;
pub const CARD_HEIGHT: u32 = 220;

const MAIN_FONT_FAMILY: &str = "DejaVu Sans";
const ROW_X: f64 = 110.0;
const FIRST_ROW_Y: f64 = 63.0;
const ROW_STEP: f64 = 18.0;
const ROW_FONT_PX: f64 = 12.0;

// 全局字体数据库单例（首次调用时的字体目录生效）
static GLOBAL_FONT_DB: OnceLock<Arc<fontdb::Database>> = OnceLock::new();

fn init_global_font_db(fonts_dir: &Path) -> Arc<fontdb::Database> {
    let mut font_db = fontdb::Database::new();
    font_db.load_system_fonts();

    if fonts_dir.exists()
        && let Ok(entries) = fs::read_dir(fonts_dir)
    {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file()
                && (path.extension() == Some("ttf".as_ref())
                    || path.extension() == Some("otf".as_ref()))
                && let Err(e) = font_db.load_font_file(&path)
            {
                tracing::error!("加载字体文件失败 '{}': {}", path.display(), e);
            }
        }
    }
    font_db.set_sans_serif_family(MAIN_FONT_FAMILY);

    Arc::new(font_db)
}

/// 获取全局字体数据库
pub fn get_global_font_db(fonts_dir: &Path) -> Arc<fontdb::Database> {
    GLOBAL_FONT_DB
        .get_or_init(|| init_global_font_db(fonts_dir))
        .clone()
}

/// 渲染一张对比图所需的输入
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub prev: Snapshot,
    pub curr: Snapshot,
    pub player_name: String,
    /// osu! 站内 id，用于下载头像
    pub player_osu_id: String,
    pub country: String,
    pub mode: GameMode,
}

/// 渲染结果
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// 已准备好所有图片引用的卡片数据
#[derive(Debug, Clone)]
pub struct CardData {
    pub player_name: String,
    pub updated_on: String,
    pub avatar_href: String,
    pub mode_href: String,
    pub flag_href: String,
    pub metrics: Vec<Metric>,
}

/// 对比图渲染引擎
pub struct RenderEngine<A> {
    avatars: A,
    assets: AssetLibrary,
    fonts_dir: PathBuf,
    optimize_speed: bool,
    semaphore: Arc<Semaphore>,
}

impl<A: AvatarSource> RenderEngine<A> {
    pub fn new(avatars: A, cfg: &RenderConfig) -> Self {
        Self {
            avatars,
            assets: AssetLibrary::new(cfg.assets_path(), cfg.optimize_speed),
            fonts_dir: cfg.fonts_path(),
            optimize_speed: cfg.optimize_speed,
            semaphore: Arc::new(Semaphore::new(cfg.effective_parallelism())),
        }
    }

    pub fn assets(&self) -> &AssetLibrary {
        &self.assets
    }

    /// 渲染前后两次快照的对比图（PNG）
    pub async fn render(&self, req: &RenderRequest) -> Result<RenderedImage, PipelineError> {
        if req.curr.date_checked <= req.prev.date_checked {
            return Err(PipelineError::Malformed(format!(
                "当前快照 {} 不晚于上一次快照 {}",
                req.curr.id, req.prev.id
            )));
        }
        if req.curr.mode != req.prev.mode || req.curr.player != req.prev.player {
            return Err(PipelineError::Malformed(format!(
                "快照 {} 与 {} 不属于同一 player/mode",
                req.prev.id, req.curr.id
            )));
        }

        let t0 = std::time::Instant::now();
        let avatar = self.avatars.fetch_avatar(&req.player_osu_id).await?;
        let t_avatar = t0.elapsed();

        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::Internal(format!("渲染许可获取失败: {e}")))?;

        let assets = self.assets.clone();
        let fonts_dir = self.fonts_dir.clone();
        let optimize_speed = self.optimize_speed;
        let req = req.clone();
        let png = spawn_blocking(move || -> Result<Vec<u8>, PipelineError> {
            let card = CardData {
                player_name: req.player_name.clone(),
                updated_on: updated_on_label(req.curr.date_checked)?,
                avatar_href: encode_data_uri(&avatar, 100, 100, optimize_speed)
                    .map_err(|e| PipelineError::RenderFailed(format!("头像解码失败: {e}")))?,
                mode_href: assets.mode_icon_uri(req.mode)?,
                flag_href: assets.flag_uri(&req.country)?,
                metrics: metric_rows(&req.prev.data, &req.curr.data),
            };
            let svg = build_card_svg(&card)?;
            rasterize_png(&svg, &fonts_dir, optimize_speed)
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("阻塞渲染任务执行失败: {e}")))??;

        tracing::debug!(
            "对比图渲染完成: 头像={:?}, 总计={:?}, {} bytes",
            t_avatar,
            t0.elapsed(),
            png.len()
        );

        Ok(RenderedImage {
            png,
            width: CARD_WIDTH,
            height: CARD_HEIGHT,
        })
    }
}

/// "Month D, YYYY"
pub fn updated_on_label(unix_secs: i64) -> Result<String, PipelineError> {
    let ts = DateTime::from_timestamp(unix_secs, 0)
        .ok_or_else(|| PipelineError::Malformed(format!("无效的时间戳: {unix_secs}")))?;
    Ok(ts.format("%B %-d, %Y").to_string())
}

/// 估算文本渲染宽度（全角按字号，半角按 0.55 字号）
fn estimate_text_width(text: &str, font_px: f64) -> f64 {
    text.chars()
        .map(|ch| match ch.width() {
            Some(2) => font_px,
            Some(0) | None => 0.0,
            _ => font_px * 0.55,
        })
        .sum()
}

fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// 行尾的箭头与差值
fn write_delta_glyph(
    svg: &mut String,
    metric: &Metric,
    baseline: f64,
    text_width: f64,
) -> std::fmt::Result {
    let delta = metric.delta();
    let color = delta.direction.color();
    let x = ROW_X + text_width;
    let diff = escape_xml(&super::delta::format_decimal(delta.magnitude));

    let text_x = match delta.direction {
        Direction::Down => {
            writeln!(
                svg,
                r#"<polygon points="{:.1},{:.1} {:.1},{:.1} {:.1},{:.1}" fill="{color}" />"#,
                x + 5.0,
                baseline - 8.5,
                x + 20.0,
                baseline - 8.5,
                x + 12.5,
                baseline
            )?;
            x + 22.0
        }
        Direction::Neutral => {
            writeln!(
                svg,
                r#"<polygon points="{:.1},{:.1} {:.1},{:.1} {:.1},{:.1}" fill="{color}" />"#,
                x + 5.0,
                baseline - 5.5,
                x + 20.0,
                baseline - 5.5,
                x + 12.5,
                baseline - 13.0
            )?;
            writeln!(
                svg,
                r#"<polygon points="{:.1},{:.1} {:.1},{:.1} {:.1},{:.1}" fill="{color}" />"#,
                x + 5.0,
                baseline - 5.5,
                x + 20.0,
                baseline - 5.5,
                x + 12.5,
                baseline + 2.0
            )?;
            x + 20.0
        }
        Direction::Up => {
            writeln!(
                svg,
                r#"<polygon points="{:.1},{:.1} {:.1},{:.1} {:.1},{:.1}" fill="{color}" />"#,
                x + 5.0,
                baseline - 2.5,
                x + 20.0,
                baseline - 2.5,
                x + 12.5,
                baseline - 11.0
            )?;
            x + 20.0
        }
    };

    writeln!(
        svg,
        r#"<text x="{text_x:.1}" y="{baseline:.1}" class="row" fill="{color}">{diff}</text>"#
    )
}

/// 生成 440x220 的对比卡片 SVG
pub fn build_card_svg(card: &CardData) -> Result<String, PipelineError> {
    let fmt_err = |e| PipelineError::RenderFailed(format!("SVG formatting error: {e}"));
    let mut svg = String::with_capacity(4096 + card.avatar_href.len() * 2);

    writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{CARD_WIDTH}" height="{CARD_HEIGHT}" viewBox="0 0 {CARD_WIDTH} {CARD_HEIGHT}">"#
    )
    .map_err(fmt_err)?;
    writeln!(
        svg,
        r#"<style>text {{ font-family: '{MAIN_FONT_FAMILY}', sans-serif; fill: #FFFFFF; }} .title {{ font-size: 20px; }} .title-name {{ font-weight: bold; }} .row {{ font-size: {ROW_FONT_PX}px; }}</style>"#
    )
    .map_err(fmt_err)?;
    writeln!(
        svg,
        r##"<rect width="{CARD_WIDTH}" height="{CARD_HEIGHT}" fill="#000000" />"##
    )
    .map_err(fmt_err)?;

    // 头像、旗帜、模式图标
    writeln!(
        svg,
        r#"<image xlink:href="{}" x="0" y="0" width="100" height="100" />"#,
        escape_xml(&card.avatar_href)
    )
    .map_err(fmt_err)?;
    writeln!(
        svg,
        r#"<image xlink:href="{}" x="25" y="115" width="45" height="30" />"#,
        escape_xml(&card.flag_href)
    )
    .map_err(fmt_err)?;
    writeln!(
        svg,
        r#"<image xlink:href="{}" x="25" y="160" width="45" height="45" />"#,
        escape_xml(&card.mode_href)
    )
    .map_err(fmt_err)?;

    // 标题与日期
    writeln!(
        svg,
        r#"<text x="{ROW_X}" y="24" class="title">Stats For: <tspan class="title-name">{}</tspan></text>"#,
        escape_xml(&card.player_name)
    )
    .map_err(fmt_err)?;
    writeln!(
        svg,
        r#"<text x="{ROW_X}" y="40" class="row">Updated On: {}</text>"#,
        escape_xml(&card.updated_on)
    )
    .map_err(fmt_err)?;
    writeln!(
        svg,
        r##"<line x1="100" y1="45" x2="{CARD_WIDTH}" y2="45" stroke="#FFFFFF" stroke-width="1" />"##
    )
    .map_err(fmt_err)?;

    let mut baseline = FIRST_ROW_Y;
    for metric in &card.metrics {
        let text = metric.value_text();
        writeln!(
            svg,
            r#"<text x="{ROW_X}" y="{baseline:.1}" class="row">{}</text>"#,
            escape_xml(&text)
        )
        .map_err(fmt_err)?;
        let width = estimate_text_width(&text, ROW_FONT_PX);
        write_delta_glyph(&mut svg, metric, baseline, width).map_err(fmt_err)?;
        baseline += ROW_STEP;
    }

    svg.push_str("</svg>\n");
    Ok(svg)
}

/// SVG 栅格化并编码为 PNG
pub fn rasterize_png(
    svg_data: &str,
    fonts_dir: &Path,
    optimize_speed: bool,
) -> Result<Vec<u8>, PipelineError> {
    let t0 = std::time::Instant::now();

    let opts = UsvgOptions {
        fontdb: get_global_font_db(fonts_dir),
        font_family: MAIN_FONT_FAMILY.to_string(),
        font_size: ROW_FONT_PX as f32,
        languages: vec!["en".to_string()],
        shape_rendering: if optimize_speed {
            usvg::ShapeRendering::OptimizeSpeed
        } else {
            usvg::ShapeRendering::GeometricPrecision
        },
        text_rendering: if optimize_speed {
            usvg::TextRendering::OptimizeSpeed
        } else {
            usvg::TextRendering::OptimizeLegibility
        },
        image_rendering: if optimize_speed {
            usvg::ImageRendering::OptimizeSpeed
        } else {
            usvg::ImageRendering::OptimizeQuality
        },
        ..Default::default()
    };

    let tree = usvg::Tree::from_data(svg_data.as_bytes(), &opts)
        .map_err(|e| PipelineError::RenderFailed(format!("Failed to parse SVG: {e}")))?;
    let t_parse = t0.elapsed();

    let pixmap_size = tree.size().to_int_size();
    let mut pixmap = Pixmap::new(pixmap_size.width(), pixmap_size.height())
        .ok_or_else(|| PipelineError::RenderFailed("Failed to create pixmap".to_string()))?;
    render(&tree, Transform::default(), &mut pixmap.as_mut());
    let t_raster = t0.elapsed();

    let mut out = Vec::with_capacity((pixmap_size.width() * pixmap_size.height() * 4) as usize);
    {
        let mut encoder = png::Encoder::new(&mut out, pixmap_size.width(), pixmap_size.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        if optimize_speed {
            encoder.set_compression(png::Compression::Fast);
            encoder.set_filter(png::FilterType::NoFilter);
        } else {
            encoder.set_compression(png::Compression::Default);
            encoder.set_filter(png::FilterType::Paeth);
        }
        let mut writer = encoder
            .write_header()
            .map_err(|e| PipelineError::RenderFailed(format!("PNG write_header error: {e}")))?;
        writer
            .write_image_data(pixmap.data())
            .map_err(|e| PipelineError::RenderFailed(format!("PNG write_image_data error: {e}")))?;
        writer
            .finish()
            .map_err(|e| PipelineError::RenderFailed(format!("PNG finish error: {e}")))?;
    }
    let t_encode = t0.elapsed();

    tracing::debug!(
        "PNG渲染内部分段: 解析={:?}, 栅格化={:?}, 编码={:?}",
        t_parse,
        t_raster - t_parse,
        t_encode - t_raster
    );

    Ok(out)
}
