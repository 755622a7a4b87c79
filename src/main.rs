// src/main.rs
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mindstate::sensor::list_ports;
use mindstate::{
    Config, FileModelStore, JsonFileStore, Label, SensorLink, SerialSensor, SessionOrchestrator,
    SimulatedSensor,
};

#[derive(Parser)]
#[command(name = "mindstate")]
#[command(version)]
#[command(about = "EEG focus/relax collection, training and live prediction", long_about = None)]
struct Cli {
    /// JSON configuration file; missing file means defaults
    #[arg(long, global = true, default_value = "mindstate.json")]
    config: PathBuf,

    /// Serial port, overriding the configuration
    #[arg(long, global = true)]
    port: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports
    Ports,

    /// Record labelled windows for a user
    Collect {
        #[arg(long)]
        user: String,

        /// Relaxing or Focused
        #[arg(long)]
        label: Label,

        #[arg(long, default_value = "60")]
        seconds: u32,

        /// Use the synthetic sensor instead of the serial device
        #[arg(long)]
        simulate: bool,
    },

    /// Train and save the user's model from stored windows
    Train {
        #[arg(long)]
        user: String,
    },

    /// Stream smoothed predictions for a user
    Predict {
        #[arg(long)]
        user: String,

        #[arg(long, default_value = "30")]
        seconds: u64,

        /// Use the synthetic sensor in the given state (Relaxing or Focused)
        #[arg(long)]
        simulate: Option<Label>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        config.serial.port = port;
    }

    match cli.command {
        Commands::Ports => cmd_ports(),
        Commands::Collect {
            user,
            label,
            seconds,
            simulate,
        } => {
            let sensor = make_sensor(&config, simulate.then_some(label));
            cmd_collect(orchestrator(config, sensor)?, &user, label, seconds)
        }
        Commands::Train { user } => {
            let sensor = make_sensor(&config, None);
            cmd_train(orchestrator(config, sensor)?, &user)
        }
        Commands::Predict {
            user,
            seconds,
            simulate,
        } => {
            let sensor = make_sensor(&config, simulate);
            cmd_predict(orchestrator(config, sensor)?, &user, seconds)
        }
    }
}

fn make_sensor(config: &Config, simulated: Option<Label>) -> Box<dyn SensorLink> {
    match simulated {
        Some(state) => Box::new(
            SimulatedSensor::new(state, rand::random()).paced(Duration::from_secs(1)),
        ),
        None => Box::new(SerialSensor::new(config.serial.clone())),
    }
}

fn orchestrator(config: Config, sensor: Box<dyn SensorLink>) -> Result<SessionOrchestrator> {
    let documents = JsonFileStore::open(&config.storage.data_dir)
        .with_context(|| format!("opening {}", config.storage.data_dir.display()))?;
    let models = FileModelStore::new(&config.storage.model_dir);
    SessionOrchestrator::new(config, sensor, Arc::new(documents), Arc::new(models))
        .context("building session")
}

fn cmd_ports() -> Result<()> {
    let ports = list_ports().context("enumerating serial ports")?;
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

fn cmd_collect(orch: SessionOrchestrator, user: &str, label: Label, seconds: u32) -> Result<()> {
    println!("collecting {label} for {seconds}s ...");
    let flags = orch
        .collect_for(user, label, seconds)
        .with_context(|| format!("collecting {label} data for {user}"))?;
    println!(
        "done; relaxing collected: {}, focused collected: {}",
        flags.relaxed_data_collected, flags.focused_data_collected
    );
    Ok(())
}

fn cmd_train(orch: SessionOrchestrator, user: &str) -> Result<()> {
    let report = orch
        .train_model(user)
        .with_context(|| format!("training model for {user}"))?;
    println!("{report}");
    Ok(())
}

fn cmd_predict(orch: SessionOrchestrator, user: &str, seconds: u64) -> Result<()> {
    orch.load_model(user)
        .with_context(|| format!("loading model for {user}"))?;
    let rx = orch.start_prediction(user)?;
    let deadline = Instant::now() + Duration::from_secs(seconds);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match rx.recv_timeout(remaining) {
            Ok(prediction) => println!("{prediction}"),
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => {
                if !orch.status()?.mode.is_idle() {
                    orch.stop_prediction()?;
                }
                bail!("prediction worker stopped early; see log for the cause");
            }
        }
    }
    orch.stop_prediction()?;
    info!("prediction finished");
    Ok(())
}
