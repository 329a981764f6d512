use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;

use strand_core::events::AgentEvent;
use strand_core::provider::LlmProvider;
use strand_engine::approval::PolicyGate;
use strand_engine::budget::BudgetConfig;
use strand_engine::dispatch::ToolDispatcher;
use strand_engine::registry::default_registry;
use strand_llm::{AnthropicProvider, MockProvider, MockResponse, ReliableProvider};
use strand_server::{AgentManager, ServerConfig};
use strand_store::Database;
use strand_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "strand", about = "Conversational coding-agent runtime")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 9290)]
    port: u16,

    /// Database path. Defaults to ~/.strand/strand.db
    #[arg(long)]
    db: Option<PathBuf>,

    /// Model to use for new threads.
    #[arg(long, default_value = "claude-sonnet-4-5")]
    model: String,

    /// Use the scripted mock provider instead of a real one.
    #[arg(long)]
    mock: bool,

    /// Max token budget per thread. 0 disables budgeting.
    #[arg(long, default_value_t = 0)]
    max_tokens: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let _telemetry = init_telemetry(TelemetryConfig::default());

    tracing::info!("starting strand server");

    let db_path = args
        .db
        .unwrap_or_else(|| strand_telemetry::data_dir().join("strand.db"));
    let db = Database::open(&db_path).expect("failed to open database");

    let provider: Arc<dyn LlmProvider> = if args.mock {
        Arc::new(MockProvider::new(vec![MockResponse::stream_text(
            "Hello from the mock provider.",
        )]))
    } else {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .expect("ANTHROPIC_API_KEY must be set (or pass --mock)");
        Arc::new(ReliableProvider::with_defaults(AnthropicProvider::new(
            api_key,
            args.model.as_str(),
        )))
    };

    let registry = Arc::new(default_registry());
    let gate = Arc::new(PolicyGate::default_policy());
    let dispatcher = Arc::new(ToolDispatcher::new(registry, gate));

    let budget = (args.max_tokens > 0).then(|| BudgetConfig {
        max_tokens: args.max_tokens,
        ..BudgetConfig::default()
    });

    let (event_tx, _) = broadcast::channel::<AgentEvent>(1024);

    let manager = Arc::new(AgentManager::new(
        db.clone(),
        provider,
        dispatcher,
        event_tx.clone(),
        budget,
    ));

    let config = ServerConfig {
        port: args.port,
        ..Default::default()
    };
    let handle = strand_server::start(config, db, manager, event_tx)
        .await
        .expect("failed to start server");

    tracing::info!(port = handle.port, "strand server ready");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");

    tracing::info!("shutting down");
}
