use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use realtime_voice::utils;
use realtime_voice::{
    Config, ConnectionState, HttpTokenProvider, Microphone, SessionController, SessionObserver,
    WebRtcNegotiator,
};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Cli {
    /// Input device name; the host default when omitted
    #[arg(long)]
    device: Option<String>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Number of turns before exiting
    #[arg(long, default_value_t = 1)]
    turns: usize,
}

struct PrintObserver;

impl SessionObserver for PrintObserver {
    fn on_start(&self) {
        println!("-- listening, say something --");
    }

    fn on_stop(&self) {
        println!("-- session closed --");
    }

    fn on_message(&self, text: String) {
        println!("assistant: {}", text);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    if args.list_devices {
        println!("{}", utils::device::get_available_inputs()?);
        return Ok(());
    }

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(device) = args.device.as_deref() {
        config = config.into_builder().with_input_device(device).build()?;
    }

    let microphone = Arc::new(Microphone::new(
        config.input_device().map(str::to_string),
        config.capacity(),
    ));
    let negotiator = Arc::new(WebRtcNegotiator::new(microphone, &config));
    let tokens = Arc::new(HttpTokenProvider::from_config(&config));
    let handle = SessionController::spawn(config, tokens, negotiator, Arc::new(PrintObserver));

    let mut status = handle.status();
    for turn in 1..=args.turns {
        tracing::info!("Turn {}/{}", turn, args.turns);
        handle.start().await?;

        loop {
            tokio::select! {
                changed = status.changed() => {
                    changed.context("Session controller stopped")?;
                    let current = status.borrow_and_update().clone();
                    match current.remaining_seconds() {
                        Some(remaining) => {
                            println!("[{}] {}s left", current.display_text(), remaining)
                        }
                        None => println!("[{}]", current.display_text()),
                    }
                    if matches!(current.state(), ConnectionState::Closed | ConnectionState::Error) {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    println!("Stopping...");
                    handle.shutdown().await?;
                    return Ok(());
                }
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}
