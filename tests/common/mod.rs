#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use batchtrace_api::{
    build_router,
    config::AppConfig,
    db,
    entities::{
        barcode, batch, sku,
        user::{self, UserRole},
    },
    events::{self, EventSender},
    services::batches::{BatchSpec, IssueBatchRequest, IssuedBatch},
    services::skus::CreateSkuRequest,
    services::templates::{CreateTemplateRequest, TemplateDetail},
    AppState,
};
use chrono::{NaiveDate, Utc};
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

pub const TEST_SECRET: &str =
    "k3Jx9QvT2mWnR8pLzY4hB6cF1dG7sA0eU5iO-integration-signing-key-for-tests-only";

/// Helper harness for spinning up an application backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    pub admin: user::Model,
    pub tester: user::Model,
    pub service_account: user::Model,
    admin_token: String,
    tester_token: String,
    service_token: String,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Construct a test application, letting the caller adjust configuration first.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_SECRET.to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection: every pool checkout sees the same in-memory database
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(
            event_rx,
            events::default_handlers(),
        ));

        let state = Arc::new(AppState::new(Arc::new(pool), cfg, event_sender));

        let admin = insert_user(&state, "admin", UserRole::Admin).await;
        let tester = insert_user(&state, "tester", UserRole::Tester).await;
        let service_account = insert_user(&state, "reporting", UserRole::Service).await;

        let token = |user: &user::Model| {
            state
                .auth
                .generate_token(user)
                .expect("encode access token")
                .access_token
        };
        let admin_token = token(&admin);
        let tester_token = token(&tester);
        let service_token = token(&service_account);

        Self {
            router: build_router(state.clone()),
            state,
            admin,
            tester,
            service_account,
            admin_token,
            tester_token,
            service_token,
            _event_task: event_task,
        }
    }

    pub fn admin_token(&self) -> &str {
        &self.admin_token
    }

    pub fn tester_token(&self) -> &str {
        &self.tester_token
    }

    pub fn service_token(&self) -> &str {
        &self.service_token
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn get(&self, uri: &str, token: &str) -> Response {
        self.request(Method::GET, uri, None, Some(token)).await
    }

    pub async fn post(&self, uri: &str, body: Value, token: &str) -> Response {
        self.request(Method::POST, uri, Some(body), Some(token)).await
    }

    pub async fn seed_sku(&self, code: &str) -> sku::Model {
        self.state
            .services
            .skus
            .create_sku(CreateSkuRequest {
                code: code.to_string(),
                description: format!("Seeded SKU {}", code),
            })
            .await
            .expect("seed SKU")
    }

    pub async fn seed_template(&self, name: &str, questions: &[&str]) -> TemplateDetail {
        self.state
            .services
            .templates
            .create_template(CreateTemplateRequest {
                name: name.to_string(),
                description: None,
                questions: questions.iter().map(|q| q.to_string()).collect(),
            })
            .await
            .expect("seed template")
    }

    pub async fn issue(&self, sku_id: i32, quantity: i32) -> IssuedBatch {
        self.state
            .services
            .batches
            .issue_batch(issue_request(sku_id, quantity))
            .await
            .expect("issue batch")
    }

    /// Writes a batch and barcodes directly, bypassing the allocator. For
    /// setting up histories the service would never produce itself.
    pub async fn insert_raw_barcodes(&self, sku: &sku::Model, sequence_numbers: &[&str]) -> batch::Model {
        let db = &*self.state.db;
        let now = Utc::now();
        let batch = batch::ActiveModel {
            sku_id: Set(sku.id),
            prefix: Set(sku.code.clone()),
            batch_date: Set(date()),
            quantity: Set(sequence_numbers.len() as i32),
            device_name: Set(String::new()),
            battery: Set(String::new()),
            capacity: Set(String::new()),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("insert raw batch");

        for sequence in sequence_numbers {
            barcode::ActiveModel {
                batch_id: Set(batch.id),
                sku_id: Set(sku.id),
                sequence_number: Set(sequence.to_string()),
                created_at: Set(now),
                ..Default::default()
            }
            .insert(db)
            .await
            .expect("insert raw barcode");
        }
        batch
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 11, 5).expect("valid date")
}

pub fn issue_request(sku_id: i32, quantity: i32) -> IssueBatchRequest {
    IssueBatchRequest {
        sku_id,
        batch_date: date(),
        quantity,
        spec: BatchSpec {
            device_name: "PowerCell 5".to_string(),
            battery: "LiFePO4".to_string(),
            capacity: "5kWh".to_string(),
            ..BatchSpec::default()
        },
    }
}

pub fn sequences(barcodes: &[barcode::Model]) -> Vec<String> {
    barcodes.iter().map(|b| b.sequence_number.clone()).collect()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is JSON")
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body")
        .to_vec()
}

async fn insert_user(state: &AppState, username: &str, role: UserRole) -> user::Model {
    user::ActiveModel {
        username: Set(username.to_string()),
        email: Set(format!("{}@example.com", username)),
        // Token-only accounts; login tests create their own users
        password_hash: Set("!".to_string()),
        role: Set(role),
        is_active: Set(true),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&*state.db)
    .await
    .expect("seed user")
}
