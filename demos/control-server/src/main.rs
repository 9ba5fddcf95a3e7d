//! Demo control server.
//!
//! Run with: cargo run -p control-server-demo -- --address 127.0.0.1 --port 4433
//!
//! Agents speak JSON lines over TCP; each line of output below is a session
//! lifecycle event.

use std::{path::PathBuf, sync::Arc};

use agent_control_core::{EventStore, Handler};
use agent_control_modules::{
    ArgParser, Module, ModuleCatalog, ModuleContext, ModuleEntry, StaticPlugins,
};
use agent_control_server::{ServerConfig, ServerOrchestrator, ServerState};
use agent_control_session::SessionRegistry;
use agent_control_transport::{PresharedKeyFactory, TransportRegistry};
use anyhow::Context;
use clap::{Arg, ArgAction, Command, Parser};
use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(about = "Accept agent connections and track their sessions")]
struct Cli {
    /// Config file (defaults to the user config directory).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Interface to bind.
    #[arg(long)]
    address: Option<String>,
    /// Port to bind.
    #[arg(long)]
    port: Option<u16>,
    /// Transport profile name.
    #[arg(long)]
    transport: Option<String>,
    /// Require agents to present this key (enables the `tcp-psk` profile).
    #[arg(long)]
    psk: Option<String>,
}

struct SimpleModule(ArgParser);

impl Module for SimpleModule {
    fn arg_parser(&self) -> &ArgParser {
        &self.0
    }
}

fn plugins() -> StaticPlugins {
    StaticPlugins::new()
        .register(
            "echo",
            ModuleEntry::new(
                "misc",
                "Echo text back from the agent",
                |_: Option<ModuleContext>| {
                    Box::new(SimpleModule(ArgParser::new(
                        Command::new("echo").arg(Arg::new("text").num_args(1..).required(true)),
                    )))
                },
            ),
        )
        .register(
            "ls",
            ModuleEntry::new(
                "manage/files",
                "List a remote directory",
                |_: Option<ModuleContext>| {
                    Box::new(SimpleModule(ArgParser::new(
                        Command::new("ls").arg(Arg::new("path").default_value(".")).arg(
                            Arg::new("recursive")
                                .short('r')
                                .long("recursive")
                                .action(ArgAction::SetTrue),
                        ),
                    )))
                },
            ),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref()).context("loading config")?;
    if let Some(address) = cli.address {
        config.address = address;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(transport) = cli.transport {
        config.transport = transport;
    }

    let mut transports = TransportRegistry::with_defaults();
    let psk_profile = cli.psk.and_then(|key| {
        transports
            .get("tcp")
            .map(|tcp| tcp.clone().with_authenticator(Arc::new(PresharedKeyFactory::new(key))))
    });
    if let Some(profile) = psk_profile {
        transports.register("tcp-psk", profile);
    }

    let catalog = ModuleCatalog::discover(&plugins()).context("loading modules")?;
    tracing::info!(modules = catalog.len(), transports = ?transports.names(), "Catalog loaded");

    let server = ServerOrchestrator::new(
        config,
        transports,
        Arc::new(SessionRegistry::new()),
        Arc::new(catalog),
    );
    server.start()?;

    let events = Arc::new(EventStore::new());
    let mut feed = events.history_plus_stream();
    tokio::spawn(async move {
        while let Some(event) = feed.next().await {
            println!("{event}");
        }
    });
    let handler: Arc<dyn Handler> = events;
    server.register_handler(handler);

    tokio::select! {
        _ = server.wait_for_state(ServerState::Stopped) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            server.stop();
        }
    }
    server.join().await?;
    Ok(())
}
