//! ViewSync CLI
//!
//! Command-line interface for registering datasources, running scans and
//! inspecting the logical view catalog.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use viewsync_catalog_client::{ClientConfig, HttpCollaborators, ServiceEndpoints};
use viewsync_catalog_core::{validation, Datasource};
use viewsync_catalog_scan::{ScanCollaborators, ScanConfig, ScanResult, Scanner, SyncScheduler};
use viewsync_catalog_storage::{parse_catalog_uri, store_from_uri, CatalogLocation, DynCatalogStore};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "viewsync")]
#[command(version, about = "ViewSync scan engine CLI", long_about = None)]
struct Cli {
    /// Path or file:// URI of the catalog database
    #[arg(
        short,
        long,
        env = "VIEWSYNC_CATALOG",
        default_value = "viewsync_catalog.db",
        global = true
    )]
    catalog: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new catalog
    Init {
        /// Overwrite existing catalog if it exists
        #[arg(short, long)]
        force: bool,
    },

    /// Manage registered datasources
    Datasource {
        #[command(subcommand)]
        command: DatasourceCommands,
    },

    /// Scan one datasource and reconcile its views
    Scan {
        /// Datasource id
        datasource_id: String,

        /// External task the scan runs for (recorded as the scanner)
        #[arg(long)]
        task_id: Option<String>,

        /// Print the scan result as JSON
        #[arg(long)]
        json: bool,

        /// Print Prometheus metrics after the scan
        #[arg(long)]
        metrics: bool,
    },

    /// Periodically scan every registered datasource
    Sync {
        /// Seconds between sync rounds
        #[arg(long, default_value_t = 3600)]
        interval_secs: u64,

        /// Run a single round and exit
        #[arg(long)]
        once: bool,
    },

    /// List the logical views of a datasource
    Views {
        /// Datasource id
        datasource_id: String,
    },

    /// Show a logical view with its fields
    Show {
        /// Form view id
        form_view_id: String,
    },

    /// List recent scans of a datasource
    Records {
        /// Datasource id
        datasource_id: String,

        /// Maximum number of records
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show catalog statistics
    Stats,
}

#[derive(Subcommand)]
enum DatasourceCommands {
    /// Register a datasource (or update an existing one)
    Add {
        /// Datasource id
        id: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Source type, e.g. mysql or postgresql
        #[arg(long = "type")]
        source_type: String,

        /// Id of the datasource in the metadata collection service
        #[arg(long)]
        external_id: String,

        /// Connector catalog name in the federation engine
        #[arg(long)]
        catalog_name: String,

        /// Source schema
        #[arg(long)]
        schema: String,
    },

    /// List registered datasources
    List,
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { force } => init_catalog(&cli.catalog, force).await,
        Commands::Datasource { command } => match command {
            DatasourceCommands::Add {
                id,
                name,
                source_type,
                external_id,
                catalog_name,
                schema,
            } => {
                let datasource =
                    Datasource::new(id, name, source_type, external_id, catalog_name, schema);
                add_datasource(&cli.catalog, datasource).await
            }
            DatasourceCommands::List => list_datasources(&cli.catalog).await,
        },
        Commands::Scan {
            datasource_id,
            task_id,
            json,
            metrics,
        } => run_scan(&cli.catalog, &datasource_id, task_id.as_deref(), json, metrics).await,
        Commands::Sync {
            interval_secs,
            once,
        } => run_sync(&cli.catalog, Duration::from_secs(interval_secs), once).await,
        Commands::Views { datasource_id } => list_views(&cli.catalog, &datasource_id).await,
        Commands::Show { form_view_id } => show_view(&cli.catalog, &form_view_id).await,
        Commands::Records {
            datasource_id,
            limit,
        } => list_records(&cli.catalog, &datasource_id, limit).await,
        Commands::Stats => show_stats(&cli.catalog).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .try_init();
}

/// Open an existing catalog.
async fn open_catalog(uri: &str) -> CliResult<Arc<DynCatalogStore>> {
    let store = store_from_uri(uri)?;
    if !store.exists().await? {
        return Err(format!("No catalog at '{}'. Run `viewsync init` first.", uri).into());
    }
    Ok(store)
}

/// Build a scanner wired to the HTTP collaborators from `VIEWSYNC_*` variables.
fn build_scanner(store: Arc<DynCatalogStore>) -> CliResult<Scanner> {
    let endpoints = ServiceEndpoints::from_env()?;
    let mut template = ClientConfig::builder(endpoints.metadata_url.clone());
    if let Ok(api_key) = std::env::var(ServiceEndpoints::API_KEY_ENV) {
        template = template.api_key(api_key);
    }
    let collaborators = HttpCollaborators::connect(&endpoints, &template.build()?)?;

    Ok(Scanner::new(
        store,
        ScanCollaborators {
            metadata: collaborators.metadata,
            federation: collaborators.federation,
            codes: collaborators.codes,
            audits: collaborators.audits,
            samples: Arc::new(collaborators.samples),
        },
        ScanConfig::from_env()?,
    )?)
}

async fn init_catalog(uri: &str, force: bool) -> CliResult<()> {
    let store = store_from_uri(uri)?;

    if store.exists().await? {
        if !force {
            return Err(format!(
                "Catalog already exists at '{}'. Use --force to overwrite.",
                uri
            )
            .into());
        }
        let CatalogLocation::Local(path) = parse_catalog_uri(uri)?;
        println!("Removing existing catalog at '{}'", path.display());
        std::fs::remove_file(&path)?;
    }

    let schema_version = store.initialize().await?;
    println!("Initialized catalog at '{}' (schema v{})", uri, schema_version);

    Ok(())
}

async fn add_datasource(uri: &str, datasource: Datasource) -> CliResult<()> {
    validation::validate_identifier(&datasource.id, "datasource id")?;
    validation::validate_identifier(&datasource.catalog_name, "catalog name")?;

    let store = open_catalog(uri).await?;
    let id = datasource.id.clone();
    store.upsert_datasource(datasource).await?;
    println!("Registered datasource '{}'", id);
    Ok(())
}

async fn list_datasources(uri: &str) -> CliResult<()> {
    let store = open_catalog(uri).await?;
    let datasources = store.list_datasources().await?;

    println!("Datasources:");
    println!();

    for ds in datasources {
        print!(
            "  {} ({}, {}.{}) [{}]",
            ds.id, ds.source_type, ds.catalog_name, ds.schema, ds.status
        );
        if !ds.data_view_source.is_empty() {
            print!(" -> {}", ds.data_view_source);
        }
        if let Some(task_id) = ds.metadata_task_id {
            print!(" task {}", task_id);
        }
        println!();
    }

    Ok(())
}

async fn run_scan(
    uri: &str,
    datasource_id: &str,
    task_id: Option<&str>,
    json: bool,
    metrics: bool,
) -> CliResult<()> {
    let store = open_catalog(uri).await?;
    let scanner = build_scanner(store)?;

    let result = scanner.scan_for_task(datasource_id, task_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_scan_result(&result);
    }
    if metrics {
        println!();
        print!("{}", viewsync_catalog_scan::metrics::render());
    }

    Ok(())
}

async fn run_sync(uri: &str, interval: Duration, once: bool) -> CliResult<()> {
    let store = open_catalog(uri).await?;
    let scanner = Arc::new(build_scanner(store)?);
    let scheduler = SyncScheduler::new(scanner, interval);

    if once {
        for (datasource_id, result) in scheduler.run_once().await {
            match result {
                Ok(result) => print_scan_result(&result),
                Err(e) => println!("{}: {} ({})", datasource_id, e, e.kind()),
            }
        }
        return Ok(());
    }

    scheduler.start().await;
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    scheduler.shutdown().await;
    Ok(())
}

fn print_scan_result(result: &ScanResult) {
    println!("Scan of '{}':", result.datasource_id);
    println!("  Tables: {}", format_number(result.scan_total as i64));
    println!("  Created: {}", result.created_count);
    println!("  Updated: {}", result.updated_count);
    println!("  Deleted: {}", result.deleted_views.len());
    println!("  Errors: {}", result.error_count);
    if result.panicked_workers > 0 {
        println!("  Panicked workers: {}", result.panicked_workers);
    }
    if result.timings.create.count > 0 {
        println!(
            "  Create: mean {} ms, max {} ms",
            result.timings.create.mean().as_millis(),
            result.timings.create.max.as_millis()
        );
    }
    if result.timings.update.count > 0 {
        println!(
            "  Update: mean {} ms, max {} ms",
            result.timings.update.mean().as_millis(),
            result.timings.update.max.as_millis()
        );
    }

    if !result.error_views.is_empty() {
        println!("\nFailed tables:");
        for error in &result.error_views {
            print!("  {}: {} {}", error.technical_name, error.code, error.description);
            if !error.cause.is_empty() {
                print!(" ({})", error.cause);
            }
            println!();
        }
    }

    if !result.revoked_views.is_empty() {
        println!("\nRevoked approvals:");
        for revoked in &result.revoked_views {
            println!("  {} ({})", revoked.technical_name, revoked.audit_type);
        }
    }

    if !result.deleted_views.is_empty() {
        println!("\nDeleted views: {}", result.deleted_views.join(", "));
    }
}

async fn list_views(uri: &str, datasource_id: &str) -> CliResult<()> {
    let store = open_catalog(uri).await?;
    if store.get_datasource(datasource_id).await?.is_none() {
        return Err(format!("Datasource '{}' not found", datasource_id).into());
    }
    let views = store.list_form_views(datasource_id).await?;

    println!("Views of '{}':", datasource_id);
    println!();

    for view in views {
        print!(
            "  {} [{}/{}/{}]",
            view.technical_name, view.status, view.edit_status, view.online_status
        );
        if !view.uniform_catalog_code.is_empty() {
            print!(" {}", view.uniform_catalog_code);
        }
        println!("  {}", view.id);
    }

    Ok(())
}

async fn show_view(uri: &str, form_view_id: &str) -> CliResult<()> {
    let store = open_catalog(uri).await?;
    let view = store
        .get_form_view(form_view_id)
        .await?
        .ok_or_else(|| format!("Form view '{}' not found", form_view_id))?;

    println!("View: {}", view.technical_name);
    println!("Business name: {}", view.business_name);
    println!("Datasource: {}", view.datasource_id);
    println!("Status: {} ({})", view.status, view.edit_status);
    println!("Online: {}", view.online_status);
    if !view.uniform_catalog_code.is_empty() {
        println!("Code: {}", view.uniform_catalog_code);
    }
    if let Some(comment) = &view.comment {
        println!("Comment: {}", comment);
    }
    if let Some(filter) = &view.filter_rule {
        println!("Filter: {}", filter);
    }
    if let Some(message) = &view.delete_message {
        println!("Deleted: {}", message);
    }
    println!("Created: {}", view.created_at.to_rfc3339());
    println!("Last Updated: {}", view.updated_at.to_rfc3339());

    println!("\nFields:");
    for field in store.list_fields(&view.id).await? {
        let null_str = if field.is_nullable {
            "nullable"
        } else {
            "not null"
        };
        print!(
            "  {:>3} {} ({} <- {}, {}, {})",
            field.index, field.technical_name, field.data_type, field.original_data_type, null_str,
            field.status
        );
        if field.primary_key {
            print!(" pk");
        }
        if let Some(reset) = &field.reset {
            print!(" [override of {}]", reset.before_data_type);
        }
        println!();
    }

    Ok(())
}

async fn list_records(uri: &str, datasource_id: &str, limit: usize) -> CliResult<()> {
    let store = open_catalog(uri).await?;
    let records = store.list_scan_records(datasource_id, limit).await?;

    println!("Scans of '{}':", datasource_id);
    println!();

    for record in records {
        let scanner = if record.scanner.is_empty() {
            "-"
        } else {
            record.scanner.as_str()
        };
        println!("  {} {} {}", record.scanned_at.to_rfc3339(), scanner, record.id);
    }

    Ok(())
}

async fn show_stats(uri: &str) -> CliResult<()> {
    let store = open_catalog(uri).await?;
    let stats = store.catalog_stats().await?;

    println!("Catalog Statistics:");
    println!("  Datasources: {}", format_number(stats.datasources));
    println!("  Views: {}", format_number(stats.form_views));
    println!("  Fields: {}", format_number(stats.fields));
    println!("  Scans: {}", format_number(stats.scan_records));
    println!("  Pending index events: {}", format_number(stats.pending_outbox));
    println!("  Catalog version: {}", stats.catalog_version);

    if !stats.views_by_status.is_empty() {
        println!("\nViews by status:");
        for (status, count) in &stats.views_by_status {
            println!("  {}: {}", status, format_number(*count));
        }
    }

    Ok(())
}

fn format_number(n: i64) -> String {
    let negative = n.is_negative();
    let mut digits = n.abs().to_string();
    let mut parts = Vec::new();

    while digits.len() > 3 {
        let chunk = digits.split_off(digits.len() - 3);
        parts.push(chunk);
    }
    parts.push(digits);
    parts.reverse();

    let mut formatted = parts.join(",");
    if negative {
        formatted.insert(0, '-');
    }
    formatted
}
