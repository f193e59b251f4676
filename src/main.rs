use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use xdr_archiver::archive::ArchiveStore;
use xdr_archiver::archive::s3::S3ArchiveStore;
use xdr_archiver::backup::staging::StagingArea;
use xdr_archiver::backup::window::{ExportWindow, parse_date};
use xdr_archiver::backup::{BackupJob, BackupOrchestrator};
use xdr_archiver::billing::{BillingClient, CredentialExchange, http_client};
use xdr_archiver::config::Settings;
use xdr_archiver::records::{CustomerDirectory, RecordStore};
use xdr_archiver::reconcile::Reconciler;
use xdr_archiver::scheduler::Scheduler;
use xdr_archiver::session::{SessionCache, SessionStore};
use xdr_archiver::tools::system::{await_shutdown, install_termination_listener};
use xdr_archiver::{aws, logging};

#[derive(Parser, Debug)]
#[command(name = env!("CARGO_BIN_NAME"), version, rename_all = "kebab-case")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the backup periodically until terminated (default).
    Serve,
    /// Runs a single backup and exits.
    RunOnce {
        /// Export the day before this instant (RFC 3339) instead of the day before now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        /// Export the given day (YYYY-MM-DD).
        #[arg(long, value_parser = parse_date, conflicts_with = "at")]
        date: Option<NaiveDate>,
    },
    /// Lists archived recordings of a customer and day which were never acknowledged.
    Reconcile {
        #[arg(long)]
        customer: String,
        /// The day to check (YYYY-MM-DD).
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
    },
}

struct Stores {
    sessions: Arc<dyn SessionStore>,
    directory: Arc<dyn CustomerDirectory>,
    records: Arc<dyn RecordStore>,
}

#[cfg(feature = "aws_dynamodb")]
async fn setup_stores(
    settings: &Settings,
    sdk_config: &aws_config::SdkConfig,
) -> anyhow::Result<Stores> {
    use xdr_archiver::aws::dynamodb::DynamoClient;
    use xdr_archiver::records::dynamo::{DynamoCustomerDirectory, DynamoRecordStore};
    use xdr_archiver::session::dynamo::DynamoSessionStore;

    let client = DynamoClient::new(sdk_config, &settings.table_prefix);

    Ok(Stores {
        sessions: Arc::new(DynamoSessionStore::with_client(&client).await?),
        directory: Arc::new(DynamoCustomerDirectory::new(&client)),
        records: Arc::new(DynamoRecordStore::with_client(&client).await?),
    })
}

#[cfg(not(feature = "aws_dynamodb"))]
async fn setup_stores(
    _settings: &Settings,
    _sdk_config: &aws_config::SdkConfig,
) -> anyhow::Result<Stores> {
    anyhow::bail!(
        "{} was built without the aws_dynamodb feature and has no record store",
        xdr_archiver::APP_NAME.as_str()
    )
}

fn setup_orchestrator(
    settings: &Settings,
    stores: &Stores,
    archive: Arc<dyn ArchiveStore>,
) -> anyhow::Result<BackupOrchestrator> {
    let http = http_client(&settings.billing)?;
    let exchange = Arc::new(CredentialExchange::new(http.clone(), &settings.billing));
    let sessions = Arc::new(SessionCache::new(stores.sessions.clone(), exchange));
    let billing = Arc::new(BillingClient::new(http, &settings.billing, sessions));

    Ok(BackupOrchestrator::new(
        stores.directory.clone(),
        billing,
        archive,
        stores.records.clone(),
        &settings.backup,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::setup_tracing();

    let settings = Settings::from_env().context("Invalid configuration")?;
    tracing::debug!("Using {:?}", settings);

    let sdk_config = aws::load_sdk_config().await;
    let s3 = S3ArchiveStore::new(&sdk_config, &settings.archive);
    s3.verify_bucket().await?;
    let archive: Arc<dyn ArchiveStore> = Arc::new(s3);
    let stores = setup_stores(&settings, &sdk_config).await?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            install_termination_listener();
            let orchestrator = setup_orchestrator(&settings, &stores, archive)?;

            Scheduler::new(Arc::new(orchestrator), settings.backup.interval)
                .run_periodically(await_shutdown())
                .await;
        }
        Command::RunOnce { at, date } => {
            let orchestrator = setup_orchestrator(&settings, &stores, archive)?;
            let report = match date {
                Some(date) => orchestrator.run_window(&ExportWindow::for_date(date)?).await,
                None => orchestrator.run(at.unwrap_or_else(Utc::now)).await,
            };

            if report.failed > 0 || report.failed_customers > 0 {
                tracing::warn!("Backup finished with failures: {}", report);
            }
        }
        Command::Reconcile { customer, date } => {
            let reconciler = Reconciler::new(archive, stores.records.clone());
            let orphans = reconciler.find_orphans(&customer, date).await?;

            for orphan in &orphans {
                println!("{}", orphan);
            }

            let leftovers = StagingArea::new(&settings.backup.staging_dir)
                .staged_files()
                .await?;
            for file in &leftovers {
                println!("staged: {}", file.display());
            }

            tracing::info!(
                orphans = orphans.len(),
                staged = leftovers.len(),
                "Reconciliation of customer {} on {} completed",
                customer,
                date
            );
        }
    }

    Ok(())
}
