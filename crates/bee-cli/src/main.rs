use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bee_abi::{load_manifest, MethodRegistry};
use bee_crawler::{CrawlConfig, Crawler};
use bee_data::{CursorStore, RpcChainNode, Store};
use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::eyre::{Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bee")]
#[command(about = "Crawls an EVM chain and decodes calls to known contracts")]
#[command(version)]
struct Cli {
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[arg(long, global = true, env = "BEE_DB_PATH", default_value = "data/bee.sqlite")]
    db_path: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Crawl the chain until interrupted.
    Run(RunArgs),
    /// Print the cursor and stored record counts.
    Status,
    /// List the methods and events decodable with a manifest.
    Contracts(ContractsArgs),
}

#[derive(Args, Debug)]
struct ManifestArgs {
    /// JSON manifest of contract names, bytecode and ABIs.
    #[arg(long, env = "BEE_CONTRACTS")]
    contracts: PathBuf,

    /// Leading bytes of the keccak-256 signature hash used as method id.
    #[arg(long, env = "BEE_SELECTOR_WIDTH", default_value_t = 4)]
    selector_width: usize,
}

impl ManifestArgs {
    fn load_registry(&self) -> Result<MethodRegistry> {
        let artifacts = load_manifest(&self.contracts)?;
        let registry = MethodRegistry::builder()
            .selector_width(self.selector_width)
            .build(&artifacts)
            .wrap_err("failed to build method registry")?;
        Ok(registry)
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long, env = "BEE_RPC_URL")]
    rpc_url: String,

    #[command(flatten)]
    manifest: ManifestArgs,

    /// First height to crawl when no cursor is stored.
    #[arg(long, env = "BEE_START_HEIGHT", default_value_t = 0)]
    start_height: u64,

    #[arg(long, env = "BEE_BATCH_UNIT", default_value_t = 10)]
    batch_unit: u64,

    #[arg(long, env = "BEE_POLL_INTERVAL_SECS", default_value_t = 5)]
    poll_interval_secs: u64,

    /// Blocks below the head that may still be re-organized.
    #[arg(long, env = "BEE_FORK_WINDOW", default_value_t = 12)]
    fork_window: u64,

    #[arg(long, env = "BEE_TASK_TIMEOUT_SECS", default_value_t = 60)]
    task_timeout_secs: u64,

    #[arg(long, env = "BEE_FETCH_CONCURRENCY", default_value_t = 10)]
    fetch_concurrency: usize,

    /// Decode without writing blocks, transactions or events.
    #[arg(long, env = "BEE_NO_PERSIST")]
    no_persist: bool,
}

impl RunArgs {
    fn crawl_config(&self) -> CrawlConfig {
        CrawlConfig {
            start_height: self.start_height,
            batch_unit: self.batch_unit,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            fork_window: self.fork_window,
            task_timeout: Duration::from_secs(self.task_timeout_secs),
            fetch_concurrency: self.fetch_concurrency,
            persist: !self.no_persist,
            ..CrawlConfig::default()
        }
    }
}

#[derive(Args, Debug)]
struct ContractsArgs {
    #[command(flatten)]
    manifest: ManifestArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet)?;

    match cli.command {
        Commands::Run(args) => handle_run(&cli.db_path, args).await,
        Commands::Status => handle_status(&cli.db_path),
        Commands::Contracts(args) => handle_contracts(args),
    }
}

fn init_tracing(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .wrap_err("failed to initialize tracing filter")?;

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

async fn handle_run(db_path: &str, args: RunArgs) -> Result<()> {
    let config = args.crawl_config();
    config.validate()?;

    let registry = Arc::new(args.manifest.load_registry()?);
    ensure_parent_dir(db_path)?;
    let store = Store::new(db_path).wrap_err("failed to open SQLite store")?;
    let chain = Arc::new(RpcChainNode::new(&args.rpc_url).await?);

    let mut crawler = Crawler::new(chain, store, registry, config)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing current cycle");
            shutdown.cancel();
        }
    });

    crawler.run(cancel).await
}

fn handle_status(db_path: &str) -> Result<()> {
    let store = Store::new(db_path).wrap_err("failed to open SQLite store")?;
    let cursor = store
        .load_start_height()
        .wrap_err("failed to read crawler cursor")?;
    let summary = store.summary().wrap_err("failed to query store summary")?;

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Value"]);

    table.add_row(vec!["Database Path", db_path]);
    table.add_row(vec![
        "Next Height",
        &cursor.map_or_else(|| "not started".to_string(), |h| h.to_string()),
    ]);
    table.add_row(vec!["Blocks", &summary.blocks.to_string()]);
    table.add_row(vec![
        "Highest Block",
        &summary
            .max_block
            .map_or_else(|| "none".to_string(), |h| h.to_string()),
    ]);
    table.add_row(vec!["Method Calls", &summary.method_txs.to_string()]);
    table.add_row(vec!["Deployments", &summary.deployment_txs.to_string()]);
    table.add_row(vec!["Unattributed", &summary.unattributed_txs.to_string()]);
    table.add_row(vec!["Events", &summary.events.to_string()]);
    table.add_row(vec!["Contracts", &summary.contracts.to_string()]);

    println!("\n{}\n", table);

    info!(
        blocks = summary.blocks,
        next_height = ?cursor,
        db_path = %db_path,
        "status command completed"
    );
    Ok(())
}

fn handle_contracts(args: ContractsArgs) -> Result<()> {
    let registry = args.manifest.load_registry()?;

    let mut methods: Vec<_> = registry.methods().collect();
    methods.sort_by(|a, b| {
        (&a.contract_name, &a.signature).cmp(&(&b.contract_name, &b.signature))
    });

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Contract", "Method Id", "Signature"]);
    for method in methods {
        table.add_row(vec![
            method.contract_name.clone(),
            method.method_id.to_string(),
            method.signature.clone(),
        ]);
    }
    println!("\n{}\n", table);

    let mut events = Table::new();
    events.load_preset(UTF8_BORDERS_ONLY);
    events.set_header(vec!["Contract", "Topic", "Event"]);
    for contract in registry.contracts() {
        for event in &contract.events {
            events.add_row(vec![
                contract.contract_name.clone(),
                truncate_hash(&event.topic0.to_string()),
                event.signature.clone(),
            ]);
        }
    }
    println!("{}\n", events);

    info!(
        contracts = registry.contracts().len(),
        methods = registry.method_count(),
        "contracts command completed"
    );
    Ok(())
}

fn truncate_hash(hash: &str) -> String {
    if hash.len() > 14 {
        format!("{}…{}", &hash[..8], &hash[hash.len() - 4..])
    } else {
        hash.to_string()
    }
}

fn ensure_parent_dir(db_path: &str) -> Result<()> {
    if db_path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("failed to create data directory {}", parent.display()))?;
        }
    }
    Ok(())
}
