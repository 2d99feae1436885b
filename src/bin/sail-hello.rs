use clap::Parser;
use sail::{
    agents::hello_world,
    config::{self, AgentConfig},
    event::Event,
    transport::loopback::{LoopbackHub, LoopbackTransport},
    Agent, Error, SailResult,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_ROOM: &str = "lab@conference.localhost";

#[derive(Parser)]
#[command(author, version, about = "Runs the hello-world greeter against a visitor in an in-process room", long_about = None)]
struct Cli {
    /// Path to the greeter's config file
    #[arg(short, long, default_value = "sail.json")]
    config: PathBuf,

    /// Nickname the visitor joins the room with
    #[arg(long, default_value = "Alice")]
    visitor: String,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

async fn run(cli: &Cli) -> SailResult<()> {
    let mut config: AgentConfig = if cli.config.exists() {
        config::from_file(&cli.config)?
    } else {
        AgentConfig::default()
    };
    if config.credentials.username.is_empty() {
        config.credentials.username = config.name.to_lowercase();
    }
    let room = config
        .room
        .get_or_insert_with(|| DEFAULT_ROOM.to_string())
        .clone();
    info!("config loaded.");
    debug!("config: {:?}", config);

    let hub = LoopbackHub::new();

    let greeter = Agent::from_config(&config, Arc::new(LoopbackTransport::new(hub.clone())));
    hello_world::install(&greeter)?;
    greeter.setup(&config).await?;
    let greeter_loop = greeter.start();

    let visitor = Agent::new(
        cli.visitor.clone(),
        Arc::new(LoopbackTransport::new(hub.clone())),
    );
    let (replies_tx, mut replies) = mpsc::unbounded_channel();
    for event_type in [hello_world::WELCOME, hello_world::FAREWELL] {
        let tx = replies_tx.clone();
        visitor.on(event_type, move |event| {
            let _ = tx.send(event.clone());
        })?;
    }
    visitor
        .connect(&config.connection.host, config.connection.port)
        .await?;
    visitor
        .login(&cli.visitor.to_lowercase(), "visitor")
        .await?;
    let visitor_loop = visitor.start();
    visitor.join_channel(&room).await?;

    println!("{} joined {} as {}", greeter.name(), room, config.credentials.username);

    for event_type in [hello_world::HELLO, hello_world::GOODBYE] {
        visitor.send(Event::new(event_type))?;
        let reply = tokio::time::timeout(Duration::from_secs(5), replies.recv())
            .await
            .map_err(|_| Error::internal(format!("No answer to {}", event_type)))?
            .ok_or_else(|| Error::internal("Visitor receive loop ended"))?;
        println!(
            "{} -> {}: {}",
            event_type,
            reply.event_type(),
            reply
                .payload()
                .map(|p| serde_json::Value::from(p).to_string())
                .unwrap_or_default()
        );
    }

    visitor.shutdown().await?;
    greeter.shutdown().await?;
    for handle in [visitor_loop, greeter_loop] {
        handle
            .await
            .map_err(|e| Error::internal(format!("Receive loop panicked: {}", e)))??;
    }

    println!("Done.");
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
