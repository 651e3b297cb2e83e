use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use clap::{Args, Parser, Subcommand};

use flight_aggregator::provider::{InventoryProvider, SoapProvider, StaticInventory};
use flight_aggregator::telemetry::init_tracing;
use flight_aggregator::{
    AuditDispatcher, FlightProvider, FlightSearchService, QueryCache, SearchQuery, Settings,
    TracingAuditSink, TtlCache,
};

#[derive(Parser)]
#[command(name = "flight-search", about = "Search flights across all configured providers")]
struct Cli {
    /// JSON settings file; built-in defaults when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Every matching flight from every provider
    All(SearchArgs),
    /// Cheapest offer per itinerary, ascending by price
    Cheapest(SearchArgs),
}

#[derive(Args)]
struct SearchArgs {
    origin: String,
    destination: String,
    /// Departure day, YYYY-MM-DD
    date: NaiveDate,

    #[arg(long)]
    price_min: Option<f64>,
    #[arg(long)]
    price_max: Option<f64>,
    #[arg(long)]
    departure_from: Option<NaiveDateTime>,
    #[arg(long)]
    departure_to: Option<NaiveDateTime>,
    #[arg(long)]
    arrival_from: Option<NaiveDateTime>,
    #[arg(long)]
    arrival_to: Option<NaiveDateTime>,
}

impl SearchArgs {
    fn into_query(self) -> anyhow::Result<SearchQuery> {
        let mut query = SearchQuery::new(self.origin, self.destination, self.date)?;
        query.ensure_future(Utc::now().date_naive())?;

        if let Some(min) = self.price_min {
            query = query.with_price_min(min);
        }
        if let Some(max) = self.price_max {
            query = query.with_price_max(max);
        }
        Ok(query
            .with_departure_window(self.departure_from, self.departure_to)
            .with_arrival_window(self.arrival_from, self.arrival_to))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    init_tracing(&settings.logging);

    let soap = SoapProvider::from_config(&settings.soap_provider, settings.resilience.call_timeout())
        .context("failed to build SOAP provider")?;
    let inventory = match &settings.inventory_provider.fixture_path {
        Some(path) => StaticInventory::load(path)
            .with_context(|| format!("failed to load inventory fixture {path}"))?,
        None => StaticInventory::default(),
    };
    let providers: Vec<Arc<dyn FlightProvider>> = vec![
        Arc::new(soap),
        Arc::new(InventoryProvider::new(
            settings.inventory_provider.name.clone(),
            Arc::new(inventory),
        )),
    ];

    let backend = Arc::new(TtlCache::new());
    let _purge = backend.spawn_purge_task(Duration::from_secs(settings.cache.purge_interval_secs));
    let (audit, audit_writer) =
        AuditDispatcher::spawn(Arc::new(TracingAuditSink), settings.audit.queue_capacity);

    let service = FlightSearchService::from_settings(&settings, providers, QueryCache::new(backend))
        .with_audit(audit);

    let list = match cli.command {
        Command::All(args) => service.all_flights(&args.into_query()?).await?,
        Command::Cheapest(args) => service.cheapest_flights(&args.into_query()?).await?,
    };

    for provider in service.aggregator().providers() {
        tracing::info!(provider = %provider.name(), stats = ?provider.stats(), "provider stats");
    }

    println!("{}", serde_json::to_string_pretty(&list)?);

    // Let queued audit records flush before exit.
    drop(service);
    let _ = tokio::time::timeout(Duration::from_secs(2), audit_writer).await;

    Ok(())
}
