//! `runlens`: browse run records and build cross-source calendars from a
//! record store.

use std::collections::BTreeSet;
use std::io::IsTerminal;
use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use runlens_client::{
    AggregationOrchestrator, ClientConfig, DateRange, HttpRecordStore, StoreConfig,
    TableController,
};
use runlens_core::{Bindable, CompareOp, NavigatorState, Predicate, SchemaValue, WherePredicate};

#[derive(Parser)]
#[command(name = "runlens")]
#[command(about = "Query run records from a RunLens record store", long_about = None)]
struct Args {
    /// Record store base URL.
    #[arg(long, env = "RUNLENS_STORE_URL", default_value = "http://127.0.0.1:8080")]
    store_url: String,
    /// Transport timeout per store request, in milliseconds.
    #[arg(long, env = "RUNLENS_TIMEOUT_MS", default_value_t = 30_000)]
    timeout_ms: u64,
    /// Cancel a fetch that has not completed after this many milliseconds.
    #[arg(long, env = "RUNLENS_DEADLINE_MS")]
    deadline_ms: Option<u64>,
    /// Emit logs as JSON lines on stderr.
    #[arg(long, env = "RUNLENS_LOG_JSON", default_value_t = false)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print pages of records matching the given filters.
    Runs {
        /// `field=value` or `field!=value`; repeat to conjoin.
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// `column` or `column:desc`; repeat for secondary keys.
        #[arg(long = "sort")]
        sorts: Vec<String>,
        #[arg(long, default_value_t = 3)]
        page_size: u32,
        /// Number of pages to walk.
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Print records of the given sources inside `[start, end)`.
    Calendar {
        #[arg(long = "source", required = true)]
        sources: Vec<String>,
        /// Range start, epoch milliseconds (inclusive).
        #[arg(long)]
        start_ms: i64,
        /// Range end, epoch milliseconds (exclusive).
        #[arg(long)]
        end_ms: i64,
        /// Restrict to these state kinds instead of the defaults.
        #[arg(long = "kind")]
        kinds: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = ClientConfig {
        request_deadline: args.deadline_ms.map(Duration::from_millis),
        store: StoreConfig {
            base_url: args.store_url.clone(),
            request_timeout: Duration::from_millis(args.timeout_ms),
        },
        ..ClientConfig::default()
    };

    match args.command {
        Command::Runs {
            filters,
            sorts,
            page_size,
            pages,
        } => run_runs(config, &filters, &sorts, page_size, pages).await,
        Command::Calendar {
            sources,
            start_ms,
            end_ms,
            kinds,
        } => run_calendar(config, sources, start_ms, end_ms, kinds).await,
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,reqwest=warn".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        let ansi = std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        builder.with_ansi(ansi).init();
    }
}

async fn run_runs(
    mut config: ClientConfig,
    filters: &[String],
    sorts: &[String],
    page_size: u32,
    pages: u32,
) -> anyhow::Result<()> {
    config.page_size = NonZeroU32::new(page_size).context("--page-size must be at least 1")?;
    config.validate()?;

    let navigator = build_navigator(config.page_size, filters, sorts)?;
    let store = HttpRecordStore::new(&config.store)?;
    let table = TableController::with_state(store, navigator, &config);
    let _effect = table.refresh().await?;
    for index in 1..=pages {
        let view = table.view();
        let records = &view.navigator.page().records;
        tracing::info!(page = index, records = records.len(), "page loaded");
        println!("{}", serde_json::to_string_pretty(records)?);
        if index == pages || !view.navigator.has_next() {
            break;
        }
        let _effect = table.next_page().await?;
    }
    Ok(())
}

async fn run_calendar(
    mut config: ClientConfig,
    sources: Vec<String>,
    start_ms: i64,
    end_ms: i64,
    kinds: Vec<String>,
) -> anyhow::Result<()> {
    if !kinds.is_empty() {
        config.aggregation.kinds = kinds;
    }
    config.validate()?;
    let range = DateRange::new(start_ms, end_ms)?;
    let sources: BTreeSet<String> = sources.into_iter().collect();

    let store = HttpRecordStore::new(&config.store)?;
    let orchestrator = AggregationOrchestrator::new(store, &config);
    orchestrator.fetch(sources, range).await?;

    let entries = orchestrator.entries();
    tracing::info!(entries = entries.len(), "calendar built");
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

fn build_navigator(
    page_size: NonZeroU32,
    filters: &[String],
    sorts: &[String],
) -> anyhow::Result<NavigatorState> {
    let mut navigator = NavigatorState::new(page_size);
    for (index, filter) in filters.iter().enumerate() {
        (navigator, _) = navigator.set_filter(parse_filter(filter, index)?);
    }
    for sort in sorts {
        let (column, descending) = parse_sort(sort);
        (navigator, _) = navigator.toggle_sort(column);
        if descending {
            (navigator, _) = navigator.toggle_sort(column);
        }
    }
    Ok(navigator)
}

/// Parses `field=value` / `field!=value` into a bound comparison. The bind
/// name carries `index` so repeated filters on one field keep their values.
fn parse_filter(raw: &str, index: usize) -> anyhow::Result<WherePredicate> {
    let (field, op, value) = if let Some((field, value)) = raw.split_once("!=") {
        (field, CompareOp::Neq, value)
    } else if let Some((field, value)) = raw.split_once('=') {
        (field, CompareOp::Eq, value)
    } else {
        bail!("filter {raw:?} must look like field=value or field!=value");
    };
    let field = field.trim();
    if field.is_empty() {
        bail!("filter {raw:?} has an empty field name");
    }
    let bind = format!("{}_{index}", field.replace('.', "_"));
    Ok(
        WherePredicate::new(Predicate::compare(field, op, Bindable::bind(bind.clone())))
            .with_param(bind, parse_literal(value.trim())),
    )
}

fn parse_literal(raw: &str) -> SchemaValue {
    if let Ok(number) = raw.parse::<i64>() {
        return SchemaValue::from(number);
    }
    match raw.parse::<f64>() {
        Ok(number) if number.is_finite() => return SchemaValue::from(number),
        _ => {}
    }
    match raw {
        "true" => SchemaValue::Bool(true),
        "false" => SchemaValue::Bool(false),
        _ => SchemaValue::from(raw),
    }
}

fn parse_sort(raw: &str) -> (&str, bool) {
    match raw.rsplit_once(':') {
        Some((column, "desc")) => (column, true),
        Some((column, "asc")) => (column, false),
        _ => (raw, false),
    }
}
