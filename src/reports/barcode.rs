use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use tracing::error;

use super::{code128_modules, mm_to_px, parse_hex_color};
use crate::config::BarcodeStyleConfig;
use crate::errors::ServiceError;

/// Turns a sequence number into a raster image
pub trait BarcodeRenderer: Send + Sync {
    fn render(&self, sequence_number: &str) -> Result<RgbImage, ServiceError>;

    fn render_png(&self, sequence_number: &str) -> Result<Vec<u8>, ServiceError> {
        let image = self.render(sequence_number)?;
        let mut cursor = Cursor::new(Vec::new());
        image.write_to(&mut cursor, ImageFormat::Png).map_err(|e| {
            error!(sequence_number, error = %e, "PNG encoding failed");
            ServiceError::RenderingError(format!("PNG encoding failed: {}", e))
        })?;
        Ok(cursor.into_inner())
    }
}

/// Code128 (set B) bars, no human-readable text
#[derive(Debug, Clone)]
pub struct Code128Renderer {
    style: BarcodeStyleConfig,
}

impl Code128Renderer {
    pub fn new(style: BarcodeStyleConfig) -> Self {
        Self { style }
    }

    fn color(value: &str) -> Result<Rgb<u8>, ServiceError> {
        parse_hex_color(value)
            .map(Rgb)
            .ok_or_else(|| ServiceError::RenderingError(format!("invalid color '{}'", value)))
    }
}

impl BarcodeRenderer for Code128Renderer {
    fn render(&self, sequence_number: &str) -> Result<RgbImage, ServiceError> {
        let modules = code128_modules(sequence_number)?;
        let style = &self.style;

        let module_px = mm_to_px(style.module_width_mm, style.dpi).max(1);
        let bar_height = mm_to_px(style.module_height_mm, style.dpi).max(1);
        let quiet = mm_to_px(style.quiet_zone_mm, style.dpi);
        let margin = mm_to_px(style.text_distance_mm, style.dpi);

        let width = modules.len() as u32 * module_px + 2 * quiet;
        let height = bar_height + 2 * margin;
        let foreground = Self::color(&style.foreground)?;
        let background = Self::color(&style.background)?;

        let image = ImageBuffer::from_fn(width, height, |x, y| {
            let in_bars = x >= quiet && x < width - quiet && y >= margin && y < margin + bar_height;
            let is_bar = in_bars && modules[((x - quiet) / module_px) as usize] == 1;
            if is_bar {
                foreground
            } else {
                background
            }
        });
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style() -> BarcodeStyleConfig {
        BarcodeStyleConfig {
            dpi: 254,
            module_width_mm: 0.1,
            module_height_mm: 2.0,
            quiet_zone_mm: 0.5,
            text_distance_mm: 0.2,
            ..BarcodeStyleConfig::default()
        }
    }

    #[test]
    fn image_size_follows_style() {
        let renderer = Code128Renderer::new(style());
        let modules = code128_modules("XA001").unwrap();
        let image = renderer.render("XA001").unwrap();

        // 0.1mm at 254 dpi is one pixel per module, quiet zone five pixels
        assert_eq!(image.width(), modules.len() as u32 + 10);
        assert_eq!(image.height(), 20 + 4);
        assert_eq!(image.get_pixel(0, 10), &Rgb([255, 255, 255]));
        assert_eq!(image.get_pixel(5, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn png_has_signature() {
        let renderer = Code128Renderer::new(style());
        let png = renderer.render_png("BT100A001").unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn bad_style_color_fails_to_render() {
        let renderer = Code128Renderer::new(BarcodeStyleConfig {
            foreground: "black".into(),
            ..style()
        });
        assert!(matches!(
            renderer.render("XA001"),
            Err(ServiceError::RenderingError(_))
        ));
    }
}
