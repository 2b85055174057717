use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use mailora_warmup::config::Config;
use mailora_warmup::engine::Engine;
use mailora_warmup::secret_codec::SecretCodec;
use mailora_warmup::services::{settings_service, warmup_log_service};
use mailora_warmup::telemetry::init_tracing;

#[derive(Parser)]
#[command(name = "mailora-warmup", version, about = "Mailbox warmup engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the send and scan jobs until interrupted (default)
    Run,
    /// Run a single send tick and exit
    SendOnce,
    /// Run a single scan tick and exit
    ScanOnce,
    /// Encrypt a credential for storage in the accounts tables
    Encrypt { plaintext: String },
    /// Persist the engage-all flag; a running instance picks it up on its next scan
    EngageAll { state: Toggle },
    /// Print warmup log counts and the most recent rows as JSON
    Stats {
        #[arg(long, default_value_t = 10)]
        recent: i64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(config.debug);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::SendOnce => {
            let engine = Engine::from_config(&config).await?;
            let outcome = engine.send.run_tick().await?;
            println!("{outcome:?}");
            Ok(())
        }
        Command::ScanOnce => {
            let engine = Engine::from_config(&config).await?;
            let report = engine.scan.run_tick().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Encrypt { plaintext } => {
            let codec = SecretCodec::new(&config.secret_key);
            println!("{}", codec.encrypt(&plaintext)?);
            Ok(())
        }
        Command::EngageAll { state } => {
            let engine = Engine::from_config(&config).await?;
            let on = matches!(state, Toggle::On);
            settings_service::set_engage_all(&engine.pool, &engine.settings, on).await?;
            tracing::info!(engage_all = on, "engage-all persisted");
            Ok(())
        }
        Command::Stats { recent } => {
            let engine = Engine::from_config(&config).await?;
            let counts = warmup_log_service::status_counts(&engine.pool).await?;
            let rows = warmup_log_service::list_recent(&engine.pool, recent.max(0)).await?;
            let out = serde_json::json!({ "counts": counts, "recent": rows });
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
    }
}

async fn run(config: &Config) -> Result<()> {
    let engine = Engine::from_config(config).await?;
    let cancel = CancellationToken::new();
    let jobs = engine.start(config, cancel.clone());
    tracing::info!(
        send_interval_secs = config.send_interval.as_secs(),
        scan_interval_secs = config.scan_interval.as_secs(),
        spam_folders = ?config.spam_folders,
        "warmup engine running"
    );

    shutdown_signal().await;
    tracing::info!("shutdown requested, waiting for in-flight runs");
    cancel.cancel();
    for job in jobs {
        if let Err(e) = job.await {
            tracing::warn!("job task ended abnormally: {e}");
        }
    }
    engine.pool.close().await;
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let term = async {
        if let Ok(mut s) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            s.recv().await;
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();
    tokio::select! { _ = ctrl_c => {}, _ = term => {} }
}
