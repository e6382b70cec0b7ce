use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use batchtrace_api::{
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::user::UserRole,
    events::{Event, EventSender},
    reports::{PdfReportRenderer, ReportRenderer},
    services::{
        batches::{BatchFilter, BatchService, BatchSpec, IssueBatchRequest},
        quality_tests::{QualityTestService, TestFilter},
        skus::{CreateSkuRequest, SkuFilter, SkuService},
        users::{CreateUserRequest, UserService},
        PageRequest,
    },
};
use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Users(command) => handle_users_command(&context, command, cli.json).await?,
        Commands::Skus(command) => handle_skus_command(&context, command, cli.json).await?,
        Commands::Batches(command) => handle_batches_command(&context, command, cli.json).await?,
        Commands::Tests(command) => handle_tests_command(&context, command, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "batchtrace",
    about = "Batchtrace operator CLI: schema, accounts, SKUs, batch issuance",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    #[command(subcommand)]
    Users(UsersCommands),
    #[command(subcommand)]
    Skus(SkusCommands),
    #[command(subcommand)]
    Batches(BatchesCommands),
    #[command(subcommand)]
    Tests(TestsCommands),
}

#[derive(Subcommand)]
enum UsersCommands {
    Create(CreateUserArgs),
    List,
}

#[derive(Args)]
struct CreateUserArgs {
    #[arg(long)]
    username: String,
    #[arg(long)]
    email: String,
    #[arg(long, help = "At least 8 characters")]
    password: String,
    #[arg(long, default_value = "tester", help = "admin, tester or service")]
    role: UserRole,
}

#[derive(Subcommand)]
enum SkusCommands {
    Create(CreateSkuArgs),
    List(ListSkusArgs),
}

#[derive(Args)]
struct CreateSkuArgs {
    #[arg(long, help = "Barcode prefix, at most 10 characters")]
    code: String,
    #[arg(long, default_value = "")]
    description: String,
}

#[derive(Args)]
struct ListSkusArgs {
    #[arg(long)]
    search: Option<String>,
    #[arg(long, default_value_t = 1)]
    page: u64,
    #[arg(long, default_value_t = 50)]
    per_page: u64,
}

#[derive(Subcommand)]
enum BatchesCommands {
    Issue(IssueBatchArgs),
    List(ListBatchesArgs),
    Barcodes(ListBarcodesArgs),
    Labels(LabelsArgs),
}

#[derive(Args)]
struct IssueBatchArgs {
    #[arg(long, help = "SKU code; the barcode prefix")]
    sku: String,
    #[arg(long, help = "Production date, YYYY-MM-DD")]
    date: NaiveDate,
    #[arg(long)]
    quantity: i32,
    #[arg(long, default_value = "")]
    device_name: String,
    #[arg(long, default_value = "")]
    battery: String,
    #[arg(long, default_value = "")]
    capacity: String,
    #[arg(long)]
    mppt_cap: Option<String>,
    #[arg(long)]
    voc_max: Option<String>,
    #[arg(long)]
    feature_spec: Option<String>,
    #[arg(long)]
    ef: Option<String>,
}

#[derive(Args)]
struct ListBatchesArgs {
    #[arg(long, help = "Substring of the SKU code")]
    sku: Option<String>,
    #[arg(long)]
    from: Option<NaiveDate>,
    #[arg(long)]
    to: Option<NaiveDate>,
    #[arg(long, default_value_t = 1)]
    page: u64,
    #[arg(long, default_value_t = 20)]
    per_page: u64,
}

#[derive(Args)]
struct ListBarcodesArgs {
    batch_id: i32,
    #[arg(long)]
    search: Option<String>,
    #[arg(long, default_value_t = 1)]
    page: u64,
    #[arg(long, default_value_t = 10)]
    per_page: u64,
}

#[derive(Args)]
struct LabelsArgs {
    batch_id: i32,
    #[arg(long, help = "Output file; defaults to barcodes_batch_<prefix>.pdf")]
    out: Option<PathBuf>,
}

#[derive(Subcommand)]
enum TestsCommands {
    List(ListTestsArgs),
}

#[derive(Args)]
struct ListTestsArgs {
    #[arg(long, help = "Exact SKU code")]
    sku: Option<String>,
    #[arg(long)]
    batch_id: Option<i32>,
    #[arg(long, help = "Substring of the barcode")]
    barcode: Option<String>,
    #[arg(long)]
    from: Option<NaiveDate>,
    #[arg(long)]
    to: Option<NaiveDate>,
    #[arg(long, default_value_t = 1)]
    page: u64,
    #[arg(long, default_value_t = 20)]
    per_page: u64,
}

async fn handle_users_command(context: &CliContext, command: UsersCommands, json: bool) -> Result<()> {
    let service = context.user_service();
    match command {
        UsersCommands::Create(args) => {
            let user = service
                .create_user(CreateUserRequest {
                    username: args.username,
                    email: args.email,
                    password: args.password,
                    role: args.role,
                })
                .await
                .context("failed to create user")?;
            if json {
                print_json(&user)?;
            } else {
                println!("User {} created (id {}, role {})", user.username, user.id, user.role);
            }
        }
        UsersCommands::List => {
            let users = service.list_users().await.context("failed to list users")?;
            if json {
                print_json(&users)?;
            } else {
                for user in &users {
                    let state = if user.is_active { "active" } else { "inactive" };
                    println!("- {} • {} • {} • {}", user.id, user.username, user.role, state);
                }
            }
        }
    }
    Ok(())
}

async fn handle_skus_command(context: &CliContext, command: SkusCommands, json: bool) -> Result<()> {
    let service = context.sku_service();
    match command {
        SkusCommands::Create(args) => {
            let sku = service
                .create_sku(CreateSkuRequest {
                    code: args.code,
                    description: args.description,
                })
                .await
                .context("failed to create SKU")?;
            if json {
                print_json(&sku)?;
            } else {
                println!("SKU {} created (id {})", sku.code, sku.id);
            }
        }
        SkusCommands::List(args) => {
            let page = service
                .list_skus(
                    SkuFilter {
                        search: args.search,
                    },
                    PageRequest::new(args.page, args.per_page),
                )
                .await
                .context("failed to list SKUs")?;
            if json {
                print_json(&page)?;
            } else {
                for sku in &page.items {
                    println!("- {} • {} • {}", sku.id, sku.code, sku.description);
                }
                println!("{} of {} SKUs", page.items.len(), page.total);
            }
        }
    }
    Ok(())
}

async fn handle_batches_command(
    context: &CliContext,
    command: BatchesCommands,
    json: bool,
) -> Result<()> {
    let service = context.batch_service();
    match command {
        BatchesCommands::Issue(args) => {
            let sku = context
                .sku_service()
                .get_sku_by_code(&args.sku)
                .await
                .context("unknown SKU")?;
            let issued = service
                .issue_batch(IssueBatchRequest {
                    sku_id: sku.id,
                    batch_date: args.date,
                    quantity: args.quantity,
                    spec: BatchSpec {
                        device_name: args.device_name,
                        battery: args.battery,
                        capacity: args.capacity,
                        mppt_cap: args.mppt_cap,
                        voc_max: args.voc_max,
                        feature_spec: args.feature_spec,
                        ef: args.ef,
                    },
                })
                .await
                .context("failed to issue batch")?;
            if json {
                print_json(&issued)?;
            } else {
                let first = issued.barcodes.first().map(|b| b.sequence_number.as_str());
                let last = issued.barcodes.last().map(|b| b.sequence_number.as_str());
                println!(
                    "Batch {} issued: {} barcodes {} .. {}",
                    issued.batch.id,
                    issued.barcodes.len(),
                    first.unwrap_or("-"),
                    last.unwrap_or("-")
                );
            }
        }
        BatchesCommands::List(args) => {
            let page = service
                .list_batches(
                    BatchFilter {
                        sku_code: args.sku,
                        sku_id: None,
                        from_date: args.from,
                        to_date: args.to,
                    },
                    PageRequest::new(args.page, args.per_page),
                )
                .await
                .context("failed to list batches")?;
            if json {
                print_json(&page)?;
            } else {
                for summary in &page.items {
                    println!(
                        "- {} • {} • {} • {} units",
                        summary.batch.id,
                        summary.sku_code,
                        summary.batch.batch_date,
                        summary.batch.quantity
                    );
                }
                println!("{} of {} batches", page.items.len(), page.total);
            }
        }
        BatchesCommands::Barcodes(args) => {
            let page = service
                .list_barcodes(
                    args.batch_id,
                    args.search,
                    PageRequest::new(args.page, args.per_page),
                )
                .await
                .context("failed to list barcodes")?;
            if json {
                print_json(&page)?;
            } else {
                for barcode in &page.items {
                    println!("- {}", barcode.sequence_number);
                }
                println!("{} of {} barcodes", page.items.len(), page.total);
            }
        }
        BatchesCommands::Labels(args) => {
            let summary = service
                .get_batch(args.batch_id)
                .await
                .context("failed to load batch")?;
            let barcodes = service
                .all_barcodes(args.batch_id)
                .await
                .context("failed to load barcodes")?;
            let renderer = PdfReportRenderer::new(context.config.barcode_style.clone());
            let document = renderer
                .batch_labels(&summary.batch, &barcodes)
                .context("failed to render labels")?;
            let path = args
                .out
                .unwrap_or_else(|| PathBuf::from(&document.file_name));
            fs::write(&path, &document.bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote {} labels to {}", barcodes.len(), path.display());
        }
    }
    Ok(())
}

async fn handle_tests_command(context: &CliContext, command: TestsCommands, json: bool) -> Result<()> {
    match command {
        TestsCommands::List(args) => {
            let listing = context
                .test_service()
                .list_tests(
                    TestFilter {
                        from_date: args.from,
                        to_date: args.to,
                        sku: args.sku,
                        batch_id: args.batch_id,
                        barcode: args.barcode,
                        template_id: None,
                    },
                    PageRequest::new(args.page, args.per_page),
                )
                .await
                .context("failed to list tests")?;
            if json {
                print_json(&listing)?;
            } else {
                for summary in &listing.items {
                    println!(
                        "- {} • {} • {} • {} • {}",
                        summary.test.id,
                        summary.sequence_number,
                        summary.test.overall_status,
                        summary.operator,
                        summary.test.test_date.format("%Y-%m-%d %H:%M")
                    );
                }
                let counts = listing.counts;
                println!(
                    "{} tests: {} passed, {} failed, {} pending",
                    counts.total, counts.passed, counts.failed, counts.pending
                );
            }
        }
    }
    Ok(())
}

struct CliContext {
    config: AppConfig,
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(&config.log_level, config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        let db = Arc::new(db_pool);

        let (event_tx, mut event_rx) = mpsc::channel::<Event>(32);
        let event_sender = Arc::new(EventSender::new(event_tx));

        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                debug!(target: "batchtrace_cli", event = ?event, "received async event");
            }
        });

        Ok(Self {
            config,
            db,
            event_sender,
        })
    }

    fn user_service(&self) -> UserService {
        UserService::new(self.db.clone())
    }

    fn sku_service(&self) -> SkuService {
        SkuService::new(self.db.clone())
    }

    fn batch_service(&self) -> BatchService {
        BatchService::new(
            self.db.clone(),
            self.event_sender.clone(),
            self.config.issuance.clone(),
        )
    }

    fn test_service(&self) -> QualityTestService {
        QualityTestService::new(self.db.clone(), self.event_sender.clone())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
