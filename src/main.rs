//! Daemon entry point: CLI parsing, logging, wiring, shutdown.

use clap::Parser;
use hydrostat::config::{Config, DEFAULT_CONFIG_PATH};
use hydrostat::decode::Decoder;
use hydrostat::error::{AppResult, HydrostatError};
use hydrostat::pin::MemoryPin;
use hydrostat::publish;
use hydrostat::reader::{self, CHANNEL_CAPACITY};
use hydrostat::script::{run_actuation_loop, ScriptHost, TimerBank};
use hydrostat::store::{JsonStateStore, SensorStore};
use hydrostat::timer::{PulseTimer, SwitchTimer};
use hydrostat::transport::SerialTransport;
use log::{error, info, warn};
use rumqttc::MqttOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Parser, Debug)]
#[command(name = "hydrostat", version, about = "Soil sensor polling and irrigation actuation daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port override (or "auto" for the first enumerated port).
    #[arg(short, long)]
    port: Option<String>,

    /// Log filter: error, warn, info, debug or trace.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level: log::LevelFilter = match cli.log_level.parse() {
        Ok(level) => level,
        Err(_) => {
            eprintln!("unknown log level '{}'", cli.log_level);
            std::process::exit(2);
        }
    };
    env_logger::Builder::new().filter_level(level).init();

    if let Err(e) = run(cli).await {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let mut config = Config::load_from(&cli.config)?;
    if let Some(port) = cli.port {
        config.sensor.port = port;
    }

    info!(
        "hydrostat {} starting (port {}, poll every {:?})",
        env!("CARGO_PKG_VERSION"),
        config.sensor.port,
        config.sensor.poll_interval
    );

    let sensor_store = Arc::new(SensorStore::new(config.sensor.window_capacity));
    let state_store = Arc::new(JsonStateStore::open(&config.storage.path)?);

    let transport = SerialTransport::open(&config.sensor.port, config.sensor.read_timeout)?;

    let host = match &config.script.path {
        Some(path) => {
            info!("loading script {}", path.display());
            Some(ScriptHost::load(path, Arc::clone(&sensor_store))?)
        }
        None => None,
    };
    let bank = build_timer_bank(&config, host.as_ref(), &state_store)?;

    let (host_addr, broker_port) = config.mqtt.broker_address()?;
    let mut options = MqttOptions::new(&config.mqtt.client_id, host_addr, broker_port);
    options.set_keep_alive(Duration::from_secs(30));
    if let (Some(user), Some(pass)) = (&config.mqtt.username, &config.mqtt.password) {
        options.set_credentials(user, pass);
    }
    let topic = publish::telemetry_topic(&config.mqtt.topic_prefix, &config.mqtt.client_id);

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut poll_task = tokio::spawn(reader::run_poll_loop(
        transport,
        Decoder::new(),
        Arc::clone(&sensor_store),
        config.sensor.poll_interval,
        tx,
        shutdown_rx.clone(),
    ));
    let publish_task = tokio::spawn(publish::run_publish_loop(options, topic, rx));
    let mut actuation_task = tokio::spawn(run_actuation_loop(
        bank,
        config.script.run_interval,
        shutdown_rx,
    ));

    // Run until ctrl-c or until one of the loops dies on its own; either way
    // the watch channel tells the survivors to wind down. The publish loop
    // follows the poll loop via channel closure instead.
    let mut poll_done = false;
    let mut actuation_done = false;
    let mut outcome: AppResult<()> = Ok(());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received -> shutting down");
        }
        result = &mut poll_task => {
            poll_done = true;
            outcome = flatten(result);
        }
        result = &mut actuation_task => {
            actuation_done = true;
            outcome = flatten(result);
        }
    }

    let _ = shutdown_tx.send(true);

    if !poll_done {
        if let Err(e) = flatten(poll_task.await) {
            warn!("poll loop: {e}");
        }
    }
    if !actuation_done {
        if let Err(e) = flatten(actuation_task.await) {
            warn!("actuation loop: {e}");
        }
    }
    if let Err(e) = flatten(publish_task.await) {
        warn!("publish loop: {e}");
    }

    info!("hydrostat stopped");
    outcome
}

/// Build the timer bank from configuration, resuming any persisted state.
fn build_timer_bank(
    config: &Config,
    host: Option<&ScriptHost>,
    state_store: &Arc<JsonStateStore>,
) -> AppResult<TimerBank<MemoryPin, JsonStateStore>> {
    let mut bank = TimerBank::new(Arc::clone(state_store));

    for cfg in &config.timers.switch {
        let pin = MemoryPin::new(&cfg.name);
        let timer = SwitchTimer::restore(cfg.to_state(), pin, state_store.as_ref())?;
        let transform = match (&cfg.transform_fn, host) {
            (Some(name), Some(host)) => {
                if !host.has_function(name) {
                    warn!("switch timer {}: script has no function '{name}'", cfg.name);
                }
                Some(host.duration_transform(name))
            }
            (Some(name), None) => {
                return Err(HydrostatError::Config(format!(
                    "switch timer '{}' references script function '{name}' but no script is loaded",
                    cfg.name
                )));
            }
            (None, _) => None,
        };
        bank.add_switch(timer, transform);
    }

    for cfg in &config.timers.pulse {
        let host = host.ok_or_else(|| {
            HydrostatError::Config(format!(
                "pulse timer '{}' requires a script for '{}'",
                cfg.name, cfg.condition_fn
            ))
        })?;
        if !host.has_function(&cfg.condition_fn) {
            warn!(
                "pulse timer {}: script has no function '{}'",
                cfg.name, cfg.condition_fn
            );
        }
        let pin = MemoryPin::new(&cfg.name);
        let timer = PulseTimer::restore(cfg.to_state(), pin, state_store.as_ref())?;
        bank.add_pulse(timer, host.condition(&cfg.condition_fn));
    }

    Ok(bank)
}

fn flatten(result: Result<AppResult<()>, tokio::task::JoinError>) -> AppResult<()> {
    match result {
        Ok(inner) => inner,
        Err(e) => Err(HydrostatError::Io(std::io::Error::other(format!(
            "task join failed: {e}"
        )))),
    }
}
