use clap::Parser;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::info;

use hcelink::client::{self, fetch_from, send_to};
use hcelink::server::run_target;
use hcelink::{BridgeConfig, EventSink, TransferEvent, TransferSupervisor};

#[derive(Parser)]
#[command(name = "hcelink")]
#[command(about = "Chunked message exchange between an initiator and an emulated target")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, help = "Config file path")]
    config: Option<String>,

    #[arg(long, help = "Listen address (overrides config)")]
    listen: Option<String>,

    #[arg(long, help = "Target address (overrides config)")]
    target: Option<String>,

    #[arg(long, help = "Output as JSON")]
    json: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Act as the emulated target and print delivered messages
    Target {
        #[arg(long, help = "Content served to GET_DATA and tag readers")]
        content: Option<String>,
    },
    /// Send a message to a target
    Send { message: String },
    /// Read the target's staged content
    Fetch,
    /// Send a message to an in-process target
    Loopback { message: String },
    ShowConfig,
    GenerateConfig {
        #[arg(long, default_value = "hcelink.toml", help = "Config file path")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hcelink=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::GenerateConfig { output } = &cli.command {
        BridgeConfig::default().save(output)?;
        if cli.json {
            println!("{}", serde_json::json!({"success": true, "config_file": output}));
        } else {
            println!("✅ Config written to {}", output);
        }
        return Ok(());
    }

    let mut config = BridgeConfig::load_or_create(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.listen_address = listen;
    }
    if let Some(target) = cli.target {
        config.target_address = target;
    }

    let (events, rx) = EventSink::channel();
    let printer = spawn_printer(rx, cli.json);
    let mut supervisor = TransferSupervisor::new(config.transfer.clone(), events);

    let result = match cli.command {
        Commands::Target { content } => {
            supervisor.listen(content.or_else(|| config.staged_content.clone()));
            tokio::select! {
                result = run_target(&mut supervisor, &config.listen_address) => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                    Ok(())
                }
            }
        }
        Commands::Send { message } => {
            supervisor.queue_message(&message)?;
            let interval = config.transfer.reconnect_interval();
            send_to(&mut supervisor, &config.target_address, interval)
                .await
                .map(|_| ())
                .map_err(anyhow::Error::new)
        }
        Commands::Fetch => fetch_from(&mut supervisor, &config.target_address)
            .await
            .map(|_| ())
            .map_err(anyhow::Error::new),
        Commands::Loopback { message } => loopback(&mut supervisor, config.transfer.clone(), &message).await,
        Commands::ShowConfig => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
            Ok(())
        }
        Commands::GenerateConfig { .. } => Ok(()),
    };

    drop(supervisor);
    let _ = printer.await;
    result
}

async fn loopback(
    initiator: &mut TransferSupervisor,
    transfer: hcelink::TransferConfig,
    message: &str,
) -> anyhow::Result<()> {
    let interval = transfer.reconnect_interval();
    let (target_events, mut target_rx) = EventSink::channel();
    let mut target = TransferSupervisor::new(transfer, target_events);
    target.listen(None);

    initiator.queue_message(message)?;
    let result = client::loopback(initiator, &mut target, interval).await;

    drop(target);
    while let Some(event) = target_rx.recv().await {
        if let TransferEvent::Delivered(delivery) = event {
            println!("📨 Target received: {}", delivery.content);
        }
    }
    result.map(|_| ()).map_err(anyhow::Error::new)
}

fn spawn_printer(mut rx: UnboundedReceiver<TransferEvent>, json: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if json {
                println!("{}", event_json(&event));
                continue;
            }
            match event {
                TransferEvent::Status(text) => println!("ℹ️  {}", text),
                TransferEvent::Delivered(delivery) => println!("📨 {}", delivery.content),
                TransferEvent::Progress { acked, total } => println!("   {}/{} chunks acknowledged", acked, total),
                TransferEvent::Completed { id } => println!("✅ Delivered message {}", id),
                TransferEvent::Error(e) => println!("❌ {}", e),
            }
        }
    })
}

fn event_json(event: &TransferEvent) -> serde_json::Value {
    match event {
        TransferEvent::Status(text) => serde_json::json!({"event": "status", "text": text}),
        TransferEvent::Delivered(d) => serde_json::json!({"event": "delivered", "content": d.content, "id": d.id}),
        TransferEvent::Progress { acked, total } => serde_json::json!({"event": "progress", "acked": acked, "total": total}),
        TransferEvent::Completed { id } => serde_json::json!({"event": "completed", "id": id}),
        TransferEvent::Error(e) => serde_json::json!({"event": "error", "error": e.to_string()}),
    }
}
