//! # Parley
//!
//! Chat over request/response on pub/sub.
//!
//! ## Usage
//!
//! ```bash
//! # Server and one interactive session in a single process
//! parley
//!
//! # Request service behind a TCP hub
//! parley server --listen 0.0.0.0:7400
//!
//! # Interactive session against a running server
//! parley client --server 127.0.0.1:7400
//!
//! # Run with custom config
//! parley --config /path/to/parley.toml server
//!
//! # Run with environment variables
//! PARLEY_CALL_TIMEOUT_MS=5000 PARLEY_METRICS=1 parley
//! ```

mod config;
mod metrics;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parley_client::{ChatSession, Console, ConsoleLine, CorrelationBroker};
use parley_core::{Dispatcher, FanoutPublisher, MembershipStore, RequestService};
use parley_transport::{MemoryTransport, TcpHub, TcpTransport, Transport};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;

#[derive(Debug, Parser)]
#[command(name = "parley", version, about = "Chat over request/response on pub/sub")]
struct Cli {
    /// Configuration file; skips the default search paths.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Request service and one chat session in this process (default).
    Local,
    /// Request service behind a TCP hub.
    Server {
        /// Address to listen on; overrides `network.listen`.
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Chat session against a running server.
    Client {
        /// Server address; overrides `network.server`.
        #[arg(short, long)]
        server: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries chat output.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    if config.metrics.enabled {
        metrics::init_metrics();
        metrics::start_metrics_server(config.metrics.port)?;
    }

    match cli.mode.unwrap_or(Mode::Local) {
        Mode::Local => run_local(&config).await,
        Mode::Server { listen } => {
            let listen = listen.unwrap_or_else(|| config.network.listen.clone());
            run_server(&config, &listen).await
        }
        Mode::Client { server } => {
            let server = server.unwrap_or_else(|| config.network.server.clone());
            run_client(&config, &server).await
        }
    }
}

/// A running request service.
struct Service {
    stop: oneshot::Sender<()>,
    task: JoinHandle<Dispatcher>,
}

impl Service {
    async fn start(config: &Config, transport: Arc<MemoryTransport>) -> Result<Self> {
        let dispatcher = Dispatcher::new(
            MembershipStore::with_config(config.store()),
            FanoutPublisher::new(transport.clone()),
        );
        let service = RequestService::bind(transport, dispatcher, config.service()).await?;
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(service.run(async {
            let _ = stopped.await;
        }));
        Ok(Self { stop, task })
    }

    async fn stop(self) -> Result<()> {
        let _ = self.stop.send(());
        let dispatcher = self.task.await?;
        tracing::info!(
            users = dispatcher.store().user_count(),
            channels = dispatcher.store().channel_count(),
            "Request service stopped"
        );
        Ok(())
    }
}

async fn run_local(config: &Config) -> Result<()> {
    let transport = Arc::new(MemoryTransport::with_config(config.transport()));
    let service = Service::start(config, transport.clone()).await?;

    tracing::info!(
        request_topic = %config.topics.request,
        response_topic = %config.topics.response,
        "Parley started"
    );

    let printer = run_session(config, transport.clone()).await?;
    service.stop().await?;
    transport.close();
    printer.await?;
    Ok(())
}

async fn run_server(config: &Config, listen: &str) -> Result<()> {
    let transport = Arc::new(MemoryTransport::with_config(config.transport()));
    let service = Service::start(config, transport.clone()).await?;

    let hub = TcpHub::bind(listen, transport.clone())
        .await
        .with_context(|| format!("Failed to listen on {listen}"))?;
    tracing::info!(
        addr = %hub.local_addr()?,
        request_topic = %config.topics.request,
        response_topic = %config.topics.response,
        "Parley server started"
    );

    hub.run_until(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;

    service.stop().await?;
    transport.close();
    Ok(())
}

async fn run_client(config: &Config, server: &str) -> Result<()> {
    let transport = Arc::new(
        TcpTransport::connect(server)
            .await
            .with_context(|| format!("Failed to connect to {server}"))?,
    );
    tracing::info!(server = %transport.peer_addr(), "Parley client started");

    let printer = run_session(config, transport.clone()).await?;
    transport.close();
    printer.await?;
    Ok(())
}

/// Run an interactive session until `EXIT`, end of input or Ctrl-C.
///
/// Returns the console printer, which finishes once the transport closes.
async fn run_session(config: &Config, transport: Arc<dyn Transport>) -> Result<JoinHandle<()>> {
    let broker = CorrelationBroker::connect(transport.clone(), config.broker()).await?;
    let (console, mut lines) = Console::channel();
    let printer = tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            match line {
                ConsoleLine::Info(text) => println!("{text}"),
                ConsoleLine::Error(text) => eprintln!("{text}"),
            }
        }
    });

    let mut session = ChatSession::new(broker, transport, console);
    let input = spawn_stdin_reader()?;
    let interrupted = tokio::select! {
        () = session.run(input) => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        tracing::info!("Interrupted");
        // Free the nickname on the server.
        session.handle_line("EXIT").await;
    }
    Ok(printer)
}

/// Read stdin lines on a dedicated thread.
///
/// A blocking read cannot be cancelled, so the thread is left detached and
/// ends with the process.
fn spawn_stdin_reader() -> Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to start stdin reader")?;
    Ok(rx)
}
