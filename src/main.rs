use anyhow::{bail, Context, Result};
use clap::Parser;
use loqa_live::audio::{AudioDevices, VirtualDevices};
use loqa_live::context::{NatsSummarizer, StaticSummarizer, Summarizer};
use loqa_live::history::{HistoryStore, JsonFileHistory, MemoryHistory};
use loqa_live::live::{LiveTransport, LoopbackTransport, NatsLiveTransport};
use loqa_live::session::ConversationDeps;
use loqa_live::{create_router, AppState, Config};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loqa-live")]
#[command(about = "Real-time voice conversation service")]
struct Args {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/loqa-live")]
    config: String,

    /// Override the HTTP port from the config
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("loqa_live=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("Loqa Live v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let (transport, summarizer): (Arc<dyn LiveTransport>, Arc<dyn Summarizer>) =
        match &cfg.live.nats_url {
            Some(url) => {
                let transport =
                    NatsLiveTransport::connect(url, &cfg.live.subject_prefix, cfg.connect_timeout())
                        .await
                        .context("Failed to connect to NATS")?;
                let summarizer = NatsSummarizer::new(
                    transport.client().clone(),
                    cfg.summarizer.subject.clone(),
                    cfg.summarizer_timeout(),
                    cfg.summarizer.word_limit,
                );
                (Arc::new(transport), Arc::new(summarizer))
            }
            None => {
                warn!("No live.nats_url configured, using the in-process loopback transport");
                let (transport, _server) = LoopbackTransport::new();
                let summarizer = StaticSummarizer("No document summary is available.".to_string());
                (Arc::new(transport), Arc::new(summarizer))
            }
        };

    let devices: Arc<dyn AudioDevices> = match cfg.audio.backend.as_str() {
        "virtual" => Arc::new(VirtualDevices::default()),
        #[cfg(feature = "cpal")]
        "cpal" => Arc::new(loqa_live::audio::CpalDevices {
            input_device: cfg.audio.input_device.clone(),
            output_device: cfg.audio.output_device.clone(),
        }),
        other => bail!("Unsupported audio backend: {}", other),
    };

    let history: Arc<dyn HistoryStore> = match cfg.history_path() {
        Some(path) => {
            info!("History file: {}", path.display());
            Arc::new(JsonFileHistory::new(path))
        }
        None => Arc::new(MemoryHistory::new()),
    };

    let deps = ConversationDeps {
        transport,
        devices,
        summarizer,
    };
    let state = AppState::new(deps, cfg.conversation(), history);
    let app = create_router(state);

    let port = args.port.unwrap_or(cfg.service.http.port);
    let addr = format!("{}:{}", cfg.service.http.bind, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
