// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! pulsewatch CLI entrypoint: load configuration, build the supervisor,
//! and run until Ctrl-C or a signal requests shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use pulsewatch::config::Config;
use pulsewatch::consumers::csv::CsvConsumer;
use pulsewatch::consumers::dashboard::{DashboardConsumer, DashboardSnapshot};
use pulsewatch::consumers::mqtt::MqttConsumer;
use pulsewatch::consumers::Consumer;
use pulsewatch::supervisor::Supervisor;
use pulsewatch::VERSION;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// pulsewatch - multi-antenna VHF telemetry pulse receiver.
#[derive(Parser, Debug)]
#[command(name = "pulsewatch")]
#[command(version = VERSION)]
#[command(about = "Multi-antenna VHF telemetry pulse receiver and cross-device matcher")]
struct Args {
    /// Configuration file path. Created with defaults if it doesn't exist.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug-level logging.
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging.
    #[arg(long)]
    trace: bool,

    /// Run against the deterministic fake SDR backend instead of real
    /// hardware, regardless of the `hardware` feature.
    #[arg(long)]
    demo: bool,

    /// Override the configured MQTT broker address.
    #[arg(long)]
    mqtt_broker: Option<String>,

    /// Override the configured CSV output directory.
    #[arg(long)]
    csv_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("pulsewatch v{VERSION} starting");

    let config_path = args.config.unwrap_or_else(Config::default_path);
    let mut config = match Config::load_or_create(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!("fatal configuration error: {err}");
            std::process::exit(1);
        }
    };
    if let Some(broker) = args.mqtt_broker {
        config.mqtt_broker = Some(broker);
    }
    if let Some(dir) = args.csv_dir {
        config.csv_output_dir = Some(dir);
    }
    if let Err(err) = config.validate() {
        error!("fatal configuration error: {err}");
        std::process::exit(1);
    }
    info!("loaded configuration from {config_path:?}, {} device(s)", config.device.len());

    let rt = tokio::runtime::Runtime::new()?;
    let exit_code = rt.block_on(run(config, args.demo))?;
    std::process::exit(exit_code);
}

async fn run(config: Config, demo: bool) -> Result<i32> {
    let station = config.station_name();

    let mut consumers: Vec<(&str, Box<dyn Consumer>)> = Vec::new();

    let csv_dir = config
        .csv_output_dir
        .clone()
        .unwrap_or_else(|| Config::config_dir().join("data"));
    let csv_signals = CsvConsumer::open_signals(&csv_dir, &station)
        .context("failed to open per-device signal CSV file")?;
    let csv_matched = CsvConsumer::open_matched(&csv_dir, &station)
        .context("failed to open matched-signal CSV file")?;
    consumers.push(("csv-signal", Box::new(csv_signals)));
    consumers.push(("csv-matched", Box::new(csv_matched)));

    if let Some(broker) = &config.mqtt_broker {
        match MqttConsumer::connect(broker, &station) {
            Ok(mqtt) => consumers.push(("mqtt", Box::new(mqtt))),
            Err(err) => error!("failed to connect to MQTT broker {broker}: {err}, running without MQTT fan-out"),
        }
    }

    let dashboard_snapshot = DashboardSnapshot::new();
    consumers.push(("dashboard", Box::new(DashboardConsumer::new(dashboard_snapshot))));

    let running = Arc::new(AtomicBool::new(true));
    let supervisor = Supervisor::build(config, consumers, running.clone(), demo)
        .context("failed to build supervisor")?;

    let supervisor_thread = std::thread::Builder::new()
        .name("supervisor".into())
        .spawn(move || supervisor.run())
        .context("failed to spawn supervisor thread")?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping workers");
    running.store(false, Ordering::Relaxed);

    match supervisor_thread.join() {
        Ok(Ok(())) => {
            info!("pulsewatch shut down cleanly");
            Ok(0)
        }
        Ok(Err(err)) => {
            error!("supervisor terminated: {err}");
            Ok(2)
        }
        Err(_) => {
            error!("supervisor thread panicked");
            Ok(2)
        }
    }
}
