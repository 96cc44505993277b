use clap::Parser;
use miette::{IntoDiagnostic, Result};
use ordercore::application::Commerce;
use ordercore::application::context::CommerceConfig;
use ordercore::application::retry::RetryPolicy;
use ordercore::domain::ports::RecordStoreRef;
use ordercore::domain::tenant::TenantId;
use ordercore::infrastructure::gateway::SimulatedGateway;
use ordercore::infrastructure::in_memory::{InMemoryRecordStore, InMemoryTenantDirectory};
use ordercore::interfaces::csv::journal_reader::JournalReader;
use ordercore::interfaces::csv::order_writer::OrderWriter;
use ordercore::interfaces::journal::JournalRunner;
use ordercore::interfaces::provisioning::{TenantsFile, provision};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input journal CSV file
    input: PathBuf,

    /// Tenants JSON file (configuration, credentials, catalog)
    #[arg(long)]
    tenants: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Upper bound for a single gateway call, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    gateway_timeout_ms: u64,

    /// Attempts per operation on concurrent-write conflicts
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,
}

/// Opens the record store of one tenant.
type StoreFactory = Box<dyn FnMut(&TenantId) -> ordercore::Result<RecordStoreRef>>;

#[cfg(feature = "storage-rocksdb")]
fn store_factory(db_path: Option<PathBuf>) -> Result<StoreFactory> {
    use ordercore::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(db_path) => {
            let db = RocksDBStore::open(db_path).into_diagnostic()?;
            Ok(Box::new(move |tenant| {
                Ok(Arc::new(db.scoped(tenant)?) as RecordStoreRef)
            }))
        }
        None => Ok(Box::new(|_| {
            Ok(Arc::new(InMemoryRecordStore::new()) as RecordStoreRef)
        })),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn store_factory(db_path: Option<PathBuf>) -> Result<StoreFactory> {
    if db_path.is_some() {
        tracing::warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Box::new(|_| {
        Ok(Arc::new(InMemoryRecordStore::new()) as RecordStoreRef)
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let tenants = TenantsFile::load(&cli.tenants).into_diagnostic()?;
    let directory = InMemoryTenantDirectory::new();
    let credentials = provision(&tenants, &directory, store_factory(cli.db_path)?)
        .await
        .into_diagnostic()?;

    let config = CommerceConfig {
        retry: RetryPolicy {
            max_attempts: cli.max_attempts,
            ..RetryPolicy::default()
        },
        gateway_timeout: Duration::from_millis(cli.gateway_timeout_ms),
        ..CommerceConfig::default()
    };
    let commerce = Commerce::builder(Arc::new(directory), Arc::new(credentials))
        .gateway("simulated", Arc::new(SimulatedGateway::new()))
        .config(config)
        .build();

    // Replay the journal
    let mut runner = JournalRunner::new(commerce);
    let file = File::open(cli.input).into_diagnostic()?;
    let reader = JournalReader::new(file);
    for (row, entry) in reader.entries().enumerate() {
        match entry {
            Ok(entry) => {
                if let Err(e) = runner.apply(entry).await {
                    eprintln!("Error applying journal row {}: {}", row + 1, e);
                }
            }
            Err(e) => {
                eprintln!("Error reading journal row {}: {}", row + 1, e);
            }
        }
    }

    // Output final state
    let orders = runner.orders().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = OrderWriter::new(stdout.lock());
    writer.write_orders(&orders).into_diagnostic()?;

    Ok(())
}
