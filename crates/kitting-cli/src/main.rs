//! `kitting-cli` – entry point of the kitting node.
//!
//! 1. Loads `~/.kitting/config.toml`, writing the defaults on first run.
//! 2. Initialises tracing (optionally exporting spans over OTLP).
//! 3. Connects to rosbridge and subscribes to orders, cameras and `/tf`.
//! 4. Runs the start handshake, then the fulfillment driver until Ctrl-C.

mod config;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use kitting_middleware::{EventBus, RosBridge, RosbridgeClient, Topic};
use kitting_perception::transform::TfBuffer;
use kitting_runtime::{
    FulfillmentContext, FulfillmentDriver, FulfillmentServices, HandshakeOutcome, init_tracing,
};
use kitting_types::{Event, EventPayload};
use tracing::{error, info, warn};

fn main() {
    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    println!("  rosbridge: {}", cfg.rosbridge_url.dimmed());
    println!();

    // Before the runtime exists: the span exporter is synchronous.
    let tracing_guard = init_tracing("kitting");
    info!(otlp = tracing_guard.is_exporting(), "tracing initialised");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cfg)) {
        error!(error = %e, "kitting node stopped");
        std::process::exit(1);
    }
}

async fn run(cfg: config::Config) -> Result<(), kitting_types::KitError> {
    let bus = EventBus::new(cfg.bus_capacity);
    let shutdown = Arc::new(AtomicBool::new(false));
    install_ctrlc(Arc::clone(&shutdown), bus.clone());

    // Subscribers first, so nothing delivered after connecting is lost.
    let tf = Arc::new(TfBuffer::new());
    let _tf_listener = Arc::clone(&tf).spawn_listener(bus.subscribe_to(Topic::Transforms));

    let ctx = Arc::new(FulfillmentContext::new());
    let client = Arc::new(
        RosbridgeClient::connect(
            &cfg.rosbridge_url,
            RosBridge::new(bus.clone()),
            cfg.service_timeout(),
        )
        .await?,
    );
    let services = FulfillmentServices {
        locations: client.clone(),
        transforms: tf,
        kinematics: client.clone(),
    };
    let mut driver = FulfillmentDriver::new(cfg.fulfillment(), ctx, services, bus.clone());

    client.subscribe_all()?;
    info!("subscribed to orders, logical cameras and tf");

    match driver.start(client.as_ref()).await {
        HandshakeOutcome::Started { attempts, .. } => {
            println!("  {} Competition started ({attempts} attempt(s))", "✓".green().bold());
        }
        HandshakeOutcome::Rejected { message, .. } => {
            println!("  {} Start rejected: {message}", "!".yellow().bold());
        }
        HandshakeOutcome::RetriesExhausted { attempts } => {
            println!(
                "  {} Start service unreachable after {attempts} attempts",
                "!".yellow().bold()
            );
        }
    }

    driver.run(shutdown).await;
    Ok(())
}

fn install_ctrlc(shutdown: Arc<AtomicBool>, bus: EventBus) {
    if let Err(e) = ctrlc::set_handler(move || {
        if shutdown.swap(true, Ordering::SeqCst) {
            // Second Ctrl-C: the driver may be blocked in a long wait.
            std::process::exit(130);
        }
        println!();
        println!("{}", "⚠  Ctrl-C received – finishing the current step …".yellow().bold());
        let event = Event::new(
            "kitting-cli",
            EventPayload::Fault {
                component: "cli".to_string(),
                message: "operator Ctrl-C".to_string(),
            },
        );
        let _ = bus.publish_to(Topic::SystemAlerts, event);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"   __ __ _ __  __  _           "#.bold().cyan());
    println!("{}", r#"  / //_/(_) /_/ /_(_)__  ___ _ "#.bold().cyan());
    println!("{}", r#" / ,<  / / __/ __/ / _ \/ _ `/ "#.bold().cyan());
    println!("{}", r#"/_/|_|/_/\__/\__/_/_//_/\_, /  "#.bold().cyan());
    println!("{}", r#"                       /___/   "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "kitting".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Order fulfillment node for the kitting cell");
    println!();
}
