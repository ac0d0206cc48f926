/// 头像与静态图标
pub mod assets;
/// 指标差值分类与数字格式
pub mod delta;
mod renderer;

/// 启动期预热字体数据库，降低首张图的长尾延迟。
pub(crate) fn prewarm_fonts(fonts_dir: &std::path::Path) -> usize {
    renderer::get_global_font_db(fonts_dir).len()
}

pub use assets::{AssetLibrary, AvatarSource, HttpAvatarSource};
pub use delta::{Delta, Direction, Metric, MetricKind, classify, format_decimal};
pub use renderer::{
    CARD_HEIGHT, CARD_WIDTH, CardData, RenderEngine, RenderRequest, RenderedImage, build_card_svg,
    rasterize_png, updated_on_label,
};
