use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use chainsight::analysis::AnalysisPipeline;
use chainsight::annotate::Stage;
use chainsight::config::{validate_config, Config};
use chainsight::ingest::IngestionService;
use chainsight::server::{self, AppState};
use chainsight::store::{SqliteStore, TransactionStore};
use chainsight::workflow::{AnalysisWorkflow, ExecutionPlan};

#[derive(Parser)]
#[command(name = "chainsight", version, about = "Ethereum transaction ingestion and LLM analysis")]
struct Cli {
    /// YAML or JSON configuration file
    #[arg(long, global = true, env = "CHAINSIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Analysis result path
    #[arg(long, global = true)]
    result: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        #[arg(long)]
        listen: Option<String>,
    },
    /// Fetch, annotate and store transactions for an address
    Fetch {
        address: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Run the analysis workflow over stored transactions
    Analyze,
    /// List stored transactions, newest first
    Transactions {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show the analysis workflow and its execution plan
    Workflow {
        /// Write the workflow description as JSON
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    if let Some(result) = cli.result {
        config.result_path = result;
    }
    validate_config(&config)?;

    match cli.command {
        Command::Serve { listen } => cmd_serve(config, listen).await?,
        Command::Fetch { address, limit } => cmd_fetch(&config, &address, limit).await?,
        Command::Analyze => cmd_analyze(&config).await?,
        Command::Transactions { limit } => cmd_transactions(&config, limit)?,
        Command::Workflow { save } => cmd_workflow(save)?,
    }
    Ok(())
}

fn open_store(config: &Config) -> chainsight::Result<Arc<dyn TransactionStore>> {
    Ok(Arc::new(SqliteStore::open(&config.database_path)?))
}

async fn cmd_serve(config: Config, listen: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = listen.unwrap_or_else(|| config.listen.clone()).parse()?;
    let store = open_store(&config)?;
    let state = AppState {
        ingestion: Arc::new(IngestionService::from_config(&config, store.clone())?),
        store,
        result_path: config.result_path.clone(),
    };
    server::serve(addr, state).await?;
    Ok(())
}

async fn cmd_fetch(config: &Config, address: &str, limit: usize) -> chainsight::Result<()> {
    let store = open_store(config)?;
    let report = IngestionService::from_config(config, store)?
        .ingest(address, limit)
        .await?;
    println!("address: {}", report.address);
    println!("fetched: {}", report.total_fetched);
    println!("processed: {}", report.processed);
    println!("failed: {}", report.failed);
    Ok(())
}

async fn cmd_analyze(config: &Config) -> chainsight::Result<()> {
    let store = open_store(config)?;
    let pipeline = AnalysisPipeline::from_config(config, store);
    let doc = pipeline.run_analysis().await?;

    println!("run: {}", doc.metadata.run_id);
    println!("status: {:?}", doc.metadata.status);
    println!("transactions: {}", doc.metadata.transaction_count);
    if let Some(e) = &doc.error {
        println!("error: {}", e);
    }
    if let Some(advisor) = doc.stage(Stage::Advisor) {
        let field = |k: &str| {
            advisor
                .get(k)
                .map(|v| match v.as_str() {
                    Some(s) => s.to_string(),
                    None => v.to_string(),
                })
                .unwrap_or_else(|| "N/A".into())
        };
        println!("overall rating: {}/10", field("overall_rating"));
        println!("risk: {}", field("risk_assessment"));
        println!("recommendation: {}", field("recommendation"));
        println!("confidence: {}", field("confidence_level"));
        println!("summary: {}", field("summary"));
    }
    println!("result: {}", pipeline.result_path().display());
    Ok(())
}

fn cmd_transactions(config: &Config, limit: usize) -> chainsight::Result<()> {
    let store = open_store(config)?;
    let records = store.list_recent(limit)?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

fn cmd_workflow(save: Option<PathBuf>) -> chainsight::Result<()> {
    let workflow = AnalysisWorkflow::standard();
    let plan = ExecutionPlan::from_workflow(&workflow)?;

    println!("{} v{}", workflow.name, workflow.version);
    for agent in &workflow.agents {
        let deps: Vec<&str> = agent.depends_on.iter().map(|s| s.as_str()).collect();
        println!("  {:<14} {:<9} deps=[{}]", agent.name, agent.stage.as_str(), deps.join(", "));
    }
    for (i, group) in plan.parallel_groups.iter().enumerate() {
        let stages: Vec<&str> = group.iter().map(|s| s.as_str()).collect();
        println!("group {}: {}", i + 1, stages.join(", "));
    }

    if let Some(path) = save {
        workflow.save_config(&path)?;
        println!("saved: {}", path.display());
    }
    Ok(())
}
