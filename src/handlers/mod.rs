pub mod auth;
pub mod batches;
pub mod common;
pub mod health;
pub mod skus;
pub mod templates;
pub mod users;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::reports::{BarcodeRenderer, Code128Renderer, PdfReportRenderer, ReportRenderer};
use crate::services::{
    batches::BatchService, quality_tests::QualityTestService, skus::SkuService,
    templates::TemplateService, users::UserService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub skus: Arc<SkuService>,
    pub batches: Arc<BatchService>,
    pub templates: Arc<TemplateService>,
    pub tests: Arc<QualityTestService>,
    pub users: Arc<UserService>,
    pub barcode_renderer: Arc<dyn BarcodeRenderer>,
    pub report_renderer: Arc<dyn ReportRenderer>,
}

impl AppServices {
    /// Wire every service over one pool and event channel
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, config: &AppConfig) -> Self {
        Self {
            skus: Arc::new(SkuService::new(db_pool.clone())),
            batches: Arc::new(BatchService::new(
                db_pool.clone(),
                event_sender.clone(),
                config.issuance.clone(),
            )),
            templates: Arc::new(TemplateService::new(db_pool.clone(), event_sender.clone())),
            tests: Arc::new(QualityTestService::new(db_pool.clone(), event_sender)),
            users: Arc::new(UserService::new(db_pool)),
            barcode_renderer: Arc::new(Code128Renderer::new(config.barcode_style.clone())),
            report_renderer: Arc::new(PdfReportRenderer::new(config.barcode_style.clone())),
        }
    }
}
