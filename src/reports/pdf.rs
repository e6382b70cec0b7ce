use lopdf::{
    content::{Content, Operation},
    dictionary, Document, Object, ObjectId, Stream,
};
use tracing::error;

use super::{code128_modules, mm_to_pt, parse_hex_color, RenderedDocument, PDF_CONTENT_TYPE};
use crate::config::BarcodeStyleConfig;
use crate::entities::{barcode, batch};
use crate::errors::ServiceError;
use crate::services::quality_tests::TestDetail;

// A4 portrait, in points
const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const PAGE_MARGIN: f32 = 36.0;
const LABEL_GAP: f32 = 12.0;
const ROW_HEIGHT: f32 = 18.0;
// Average Helvetica glyph width as a fraction of the font size
const GLYPH_WIDTH: f32 = 0.556;

/// Builds paginated documents from read projections
pub trait ReportRenderer: Send + Sync {
    /// Label sheet for a batch; `barcodes` are printed in the given order
    fn batch_labels(
        &self,
        batch: &batch::Model,
        barcodes: &[barcode::Model],
    ) -> Result<RenderedDocument, ServiceError>;

    fn test_report(&self, detail: &TestDetail) -> Result<RenderedDocument, ServiceError>;
}

/// PDF output using the built-in Helvetica font
#[derive(Debug, Clone)]
pub struct PdfReportRenderer {
    style: BarcodeStyleConfig,
}

impl PdfReportRenderer {
    pub fn new(style: BarcodeStyleConfig) -> Self {
        Self { style }
    }

    fn color(&self, value: &str) -> Result<[f32; 3], ServiceError> {
        parse_hex_color(value)
            .map(|rgb| rgb.map(|c| f32::from(c) / 255.0))
            .ok_or_else(|| ServiceError::RenderingError(format!("invalid color '{}'", value)))
    }

    /// Label box size: quiet zones and bars across, bars plus caption down
    fn label_size(&self, modules: usize) -> (f32, f32) {
        let style = &self.style;
        let width = mm_to_pt(style.quiet_zone_mm) * 2.0 + mm_to_pt(style.module_width_mm) * modules as f32;
        let height = mm_to_pt(style.module_height_mm)
            + mm_to_pt(style.text_distance_mm)
            + style.font_size as f32;
        (width, height)
    }

    /// Draws one label with its top-left corner at (`x`, `top`)
    fn draw_label(
        &self,
        page: &mut PageBuilder,
        x: f32,
        top: f32,
        text: &str,
        modules: &[u8],
    ) -> Result<(), ServiceError> {
        let style = &self.style;
        let (width, height) = self.label_size(modules.len());
        let background = self.color(&style.background)?;
        let foreground = self.color(&style.foreground)?;
        let module_width = mm_to_pt(style.module_width_mm);
        let bar_height = mm_to_pt(style.module_height_mm);
        let bar_bottom = top - bar_height;

        page.fill_rect(background, x, top - height, width, height);

        let mut bar_x = x + mm_to_pt(style.quiet_zone_mm);
        page.set_fill(foreground);
        for run in runs(modules) {
            let run_width = module_width * run.len as f32;
            if run.bar {
                page.rect(bar_x, bar_bottom, run_width, bar_height);
            }
            bar_x += run_width;
        }
        page.op("f", vec![]);

        let font_size = style.font_size as f32;
        let text_width = text.chars().count() as f32 * font_size * GLYPH_WIDTH;
        let baseline = bar_bottom - mm_to_pt(style.text_distance_mm) - font_size * 0.8;
        page.text(x + (width - text_width).max(0.0) / 2.0, baseline, font_size, text);
        Ok(())
    }
}

impl ReportRenderer for PdfReportRenderer {
    fn batch_labels(
        &self,
        batch: &batch::Model,
        barcodes: &[barcode::Model],
    ) -> Result<RenderedDocument, ServiceError> {
        let encoded = barcodes
            .iter()
            .map(|b| Ok((b.sequence_number.as_str(), code128_modules(&b.sequence_number)?)))
            .collect::<Result<Vec<_>, ServiceError>>()?;

        let widest = encoded.iter().map(|(_, m)| m.len()).max().unwrap_or(0);
        let (label_width, label_height) = self.label_size(widest);
        let usable_width = PAGE_WIDTH - 2.0 * PAGE_MARGIN;
        let usable_height = PAGE_HEIGHT - 2.0 * PAGE_MARGIN - ROW_HEIGHT * 2.0;
        let columns = (((usable_width + LABEL_GAP) / (label_width + LABEL_GAP)).floor() as usize).max(1);
        let rows = (((usable_height + LABEL_GAP) / (label_height + LABEL_GAP)).floor() as usize).max(1);
        let per_page = columns * rows;

        let mut pdf = PdfBuilder::new();
        let chunks: Vec<_> = if encoded.is_empty() {
            vec![&encoded[..]]
        } else {
            encoded.chunks(per_page).collect()
        };
        let page_count = chunks.len();

        for (page_no, chunk) in chunks.into_iter().enumerate() {
            let mut page = PageBuilder::default();
            page.text(
                PAGE_MARGIN,
                PAGE_HEIGHT - PAGE_MARGIN - 12.0,
                12.0,
                &format!(
                    "Batch {} - {} - {} ({} / {})",
                    batch.id,
                    batch.prefix,
                    batch.batch_date,
                    page_no + 1,
                    page_count
                ),
            );

            let grid_top = PAGE_HEIGHT - PAGE_MARGIN - ROW_HEIGHT * 2.0;
            for (i, (text, modules)) in chunk.iter().enumerate() {
                let x = PAGE_MARGIN + (i % columns) as f32 * (label_width + LABEL_GAP);
                let top = grid_top - (i / columns) as f32 * (label_height + LABEL_GAP);
                self.draw_label(&mut page, x, top, text, modules)?;
            }
            pdf.add_page(page)?;
        }

        Ok(RenderedDocument {
            file_name: format!("barcodes_batch_{}.pdf", batch.prefix),
            content_type: PDF_CONTENT_TYPE,
            bytes: pdf.finish()?,
        })
    }

    fn test_report(&self, detail: &TestDetail) -> Result<RenderedDocument, ServiceError> {
        let modules = code128_modules(&detail.barcode.sequence_number)?;
        let mut pdf = PdfBuilder::new();
        let mut page = PageBuilder::default();
        let mut y = PAGE_HEIGHT - PAGE_MARGIN - 16.0;

        page.text(PAGE_MARGIN, y, 16.0, &format!("Test Report #{}", detail.test.id));
        let (label_width, _) = self.label_size(modules.len());
        self.draw_label(
            &mut page,
            (PAGE_WIDTH - PAGE_MARGIN - label_width).max(PAGE_MARGIN),
            PAGE_HEIGHT - PAGE_MARGIN,
            &detail.barcode.sequence_number,
            &modules,
        )?;
        y -= ROW_HEIGHT * 2.0;

        let header = [
            ("Barcode", detail.barcode.sequence_number.clone()),
            ("SKU", format!("{} - {}", detail.sku.code, detail.sku.description)),
            (
                "Batch",
                format!("{} ({})", detail.batch.id, detail.batch.batch_date),
            ),
            ("Device", detail.batch.device_name.clone()),
            ("Template", detail.template_name.clone().unwrap_or_else(|| "-".into())),
            ("Operator", detail.operator.clone()),
            (
                "Tested",
                detail.test.test_date.format("%Y-%m-%d %H:%M UTC").to_string(),
            ),
            ("Status", detail.test.overall_status.to_string().to_uppercase()),
        ];
        for (label, value) in header {
            page.text(PAGE_MARGIN, y, 10.0, label);
            page.text(PAGE_MARGIN + 90.0, y, 10.0, &fit(&value, 400.0, 10.0));
            y -= ROW_HEIGHT;
        }

        // Answers table, continued on new pages as needed
        let columns = [PAGE_MARGIN, PAGE_MARGIN + 28.0, PAGE_MARGIN + 300.0, PAGE_MARGIN + 350.0];
        let table_header = |page: &mut PageBuilder, y: f32| {
            for (x, title) in columns.iter().zip(["#", "Question", "Result", "Remarks"]) {
                page.text(*x, y, 10.0, title);
            }
            page.fill_rect([0.0, 0.0, 0.0], PAGE_MARGIN, y - 4.0, PAGE_WIDTH - 2.0 * PAGE_MARGIN, 0.5);
        };

        y -= ROW_HEIGHT;
        table_header(&mut page, y);
        y -= ROW_HEIGHT;
        for (i, answer) in detail.answers.iter().enumerate() {
            if y < PAGE_MARGIN {
                pdf.add_page(std::mem::take(&mut page))?;
                y = PAGE_HEIGHT - PAGE_MARGIN - 10.0;
                table_header(&mut page, y);
                y -= ROW_HEIGHT;
            }
            page.text(columns[0], y, 9.0, &(i + 1).to_string());
            page.text(columns[1], y, 9.0, &fit(&answer.question_text, 266.0, 9.0));
            page.text(columns[2], y, 9.0, if answer.is_passed { "PASS" } else { "FAIL" });
            page.text(columns[3], y, 9.0, &fit(&answer.remarks, PAGE_WIDTH - PAGE_MARGIN - columns[3], 9.0));
            y -= ROW_HEIGHT;
        }
        if detail.answers.is_empty() {
            page.text(columns[1], y, 9.0, "No answers recorded");
        }
        pdf.add_page(page)?;

        Ok(RenderedDocument {
            file_name: format!("test_report_{}.pdf", detail.barcode.sequence_number),
            content_type: PDF_CONTENT_TYPE,
            bytes: pdf.finish()?,
        })
    }
}

struct Run {
    bar: bool,
    len: usize,
}

/// Collapses adjacent equal modules so each bar is one rectangle
fn runs(modules: &[u8]) -> Vec<Run> {
    let mut out: Vec<Run> = Vec::new();
    for &m in modules {
        let bar = m == 1;
        match out.last_mut() {
            Some(run) if run.bar == bar => run.len += 1,
            _ => out.push(Run { bar, len: 1 }),
        }
    }
    out
}

/// Shortens `text` to roughly `width` points, marking the cut with "..."
fn fit(text: &str, width: f32, font_size: f32) -> String {
    let max_chars = (width / (font_size * GLYPH_WIDTH)).floor().max(3.0) as usize;
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_chars - 3).collect();
        format!("{}...", kept)
    }
}

fn real(v: f32) -> Object {
    Object::Real(v.into())
}

/// Content operations for one page
#[derive(Default)]
struct PageBuilder {
    operations: Vec<Operation>,
}

impl PageBuilder {
    fn op(&mut self, operator: &str, operands: Vec<Object>) {
        self.operations.push(Operation::new(operator, operands));
    }

    fn set_fill(&mut self, rgb: [f32; 3]) {
        self.op("rg", rgb.iter().map(|c| real(*c)).collect());
    }

    fn rect(&mut self, x: f32, y: f32, w: f32, h: f32) {
        self.op("re", vec![real(x), real(y), real(w), real(h)]);
    }

    fn fill_rect(&mut self, rgb: [f32; 3], x: f32, y: f32, w: f32, h: f32) {
        self.set_fill(rgb);
        self.rect(x, y, w, h);
        self.op("f", vec![]);
    }

    fn text(&mut self, x: f32, y: f32, size: f32, text: &str) {
        // Built-in fonts only cover ASCII reliably
        let printable: String = text
            .chars()
            .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
            .collect();
        self.set_fill([0.0, 0.0, 0.0]);
        self.op("BT", vec![]);
        self.op("Tf", vec!["F1".into(), real(size)]);
        self.op("Td", vec![real(x), real(y)]);
        self.op("Tj", vec![Object::string_literal(printable)]);
        self.op("ET", vec![]);
    }
}

/// Accumulates pages into a single document
struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    resources_id: ObjectId,
    kids: Vec<Object>,
}

impl PdfBuilder {
    fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        Self {
            doc,
            pages_id,
            resources_id,
            kids: Vec::new(),
        }
    }

    fn add_page(&mut self, page: PageBuilder) -> Result<(), ServiceError> {
        let content = Content {
            operations: page.operations,
        };
        let encoded = content.encode().map_err(render_error)?;
        let content_id = self.doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
        });
        self.kids.push(page_id.into());
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<u8>, ServiceError> {
        let count = self.kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => self.kids,
            "Count" => count,
            "Resources" => self.resources_id,
            "MediaBox" => vec![0.into(), 0.into(), real(PAGE_WIDTH), real(PAGE_HEIGHT)],
        };
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.compress();

        let mut bytes = Vec::new();
        self.doc.save_to(&mut bytes).map_err(render_error)?;
        Ok(bytes)
    }
}

fn render_error(e: impl std::fmt::Display) -> ServiceError {
    error!(error = %e, "PDF rendering failed");
    ServiceError::RenderingError(format!("PDF rendering failed: {}", e))
}
