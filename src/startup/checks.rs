use std::fs;
use std::path::Path;

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::features::image::AssetLibrary;
use crate::features::image::assets::BLANK_FLAG;
use crate::features::osu::GameMode;

/// 执行启动检查
///
/// 1. 确认素材目录与各模式图标、空白国旗存在（缺失仅告警）
/// 2. 检查字体目录
/// 3. 预热字体数据库
pub async fn run_startup_checks(config: &AppConfig) -> Result<(), PipelineError> {
    tracing::info!("🔍 开始执行启动检查...");

    let assets = AssetLibrary::new(config.render.assets_path(), config.render.optimize_speed);
    let missing = check_render_assets(&assets)?;
    if missing > 0 {
        tracing::warn!("⚠️ 缺少 {} 个渲染素材，相关模式的渲染将失败", missing);
    }

    let fonts_dir = config.render.fonts_path();
    ensure_font_dir(&fonts_dir)?;

    let t_prewarm = std::time::Instant::now();
    match tokio::task::spawn_blocking(move || crate::features::image::prewarm_fonts(&fonts_dir))
        .await
    {
        Ok(faces) => tracing::info!(
            "字体数据库预热完成: {} 个字体, {}ms",
            faces,
            t_prewarm.elapsed().as_millis()
        ),
        Err(e) => tracing::warn!("字体预热任务失败: {}", e),
    }

    tracing::info!("✅ 启动检查完成");
    Ok(())
}

/// 返回缺失的素材数量；素材根目录不存在时创建
pub fn check_render_assets(assets: &AssetLibrary) -> Result<usize, PipelineError> {
    let root = assets.root();
    if !root.exists() {
        tracing::warn!("📁 未找到素材目录，正在创建: {:?}", root);
        fs::create_dir_all(root.join("modes"))
            .and_then(|_| fs::create_dir_all(root.join("flags")))
            .map_err(|e| PipelineError::Internal(format!("创建素材目录失败: {e}")))?;
    }

    let mut missing = 0;
    for mode in GameMode::ALL {
        let path = assets.mode_icon_path(mode);
        if !path.is_file() {
            tracing::warn!("未找到模式图标: {:?}", path);
            missing += 1;
        }
    }
    let blank = assets.flag_path(BLANK_FLAG);
    if !blank.is_file() {
        tracing::warn!("未找到空白国旗: {:?}", blank);
        missing += 1;
    }
    Ok(missing)
}

/// 确保字体目录存在（没有字体文件时仅告警，回退到系统字体）
fn ensure_font_dir(dir: &Path) -> Result<(), PipelineError> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .map_err(|e| PipelineError::Internal(format!("创建字体目录失败: {e}")))?;
    }
    let has_fonts = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .any(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "ttf" | "otf" | "ttc"))
        });
    if has_fonts {
        tracing::info!("字体目录: {:?}", dir);
    } else {
        tracing::warn!("字体目录 {:?} 中没有字体文件，将只使用系统字体", dir);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_assets_are_counted_and_root_is_created() {
        let root = std::env::temp_dir().join(format!("prosu-startup-{}", uuid::Uuid::new_v4()));
        let assets = AssetLibrary::new(&root, true);

        // 4 个模式图标 + 空白国旗
        assert_eq!(check_render_assets(&assets).unwrap(), 5);
        assert!(root.join("modes").is_dir());

        fs::write(assets.mode_icon_path(GameMode::Standard), b"x").unwrap();
        fs::write(assets.flag_path(BLANK_FLAG), b"x").unwrap();
        assert_eq!(check_render_assets(&assets).unwrap(), 3);

        let _ = fs::remove_dir_all(&root);
    }
}
