//! Read-only renderers: Code128 barcode images and PDF documents built from
//! projections the services hand over. Nothing here touches the store.

pub mod barcode;
pub mod pdf;

pub use barcode::{BarcodeRenderer, Code128Renderer};
pub use pdf::{PdfReportRenderer, ReportRenderer};

use crate::errors::ServiceError;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";
pub const PNG_CONTENT_TYPE: &str = "image/png";

/// A rendered file ready to be sent as an attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Parses `#RRGGBB` (case-insensitive)
pub fn parse_hex_color(value: &str) -> Option<[u8; 3]> {
    let hex = value.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

/// Millimetres to whole pixels at `dpi`, never less than one pixel for a
/// positive length
pub fn mm_to_px(mm: f64, dpi: u32) -> u32 {
    if !mm.is_finite() || mm <= 0.0 {
        return 0;
    }
    (mm / 25.4 * f64::from(dpi)).round().max(1.0) as u32
}

/// Millimetres to PDF points
pub fn mm_to_pt(mm: f64) -> f32 {
    (mm * 72.0 / 25.4) as f32
}

/// Code128 set B modules (1 = bar) for `data`
pub fn code128_modules(data: &str) -> Result<Vec<u8>, ServiceError> {
    barcoders::sym::code128::Code128::new(format!("\u{0181}{}", data))
        .map(|code| code.encode())
        .map_err(|e| {
            tracing::error!(data, error = %e, "barcode encoding failed");
            ServiceError::RenderingError(format!("cannot encode '{}' as Code128: {}", data, e))
        })
}
