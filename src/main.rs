use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use thermolink::config::Settings;
use thermolink::console::{ConsoleController, LogDashboard};
use thermolink::device::{Actuator, AlwaysUp, DeviceController, DeviceHardware, SimulatedSensor};
use thermolink::mqtt::{ConnectionState, MqttGateway};
use thermolink::telemetry::ControlCommand;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const USAGE: &str = "usage: thermolink <device|console> [config.toml]";

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let mut args = std::env::args().skip(1);
    let role = args.next().ok_or_else(|| eyre!(USAGE))?;
    let config_path = args.next().map(PathBuf::from);
    let settings = Settings::resolve(config_path).await?;
    debug!("Resolved settings: {:?}", settings);

    match role.as_str() {
        "device" => run_device(settings).await,
        "console" => run_console(settings).await,
        other => Err(eyre!("Unknown role `{}`; {}", other, USAGE)),
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env();
    Ok(())
}

/// Per-target filter from `RUST_LOG` directives, `info` when unset or invalid.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn setup_logging_env() {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();

    FmtSubscriber::builder()
        .with_env_filter(log_filter(directives.as_deref()))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Logs broker link transitions, with the gateway counters whenever it drops.
fn watch_link(gateway: Arc<MqttGateway>) -> JoinHandle<()> {
    let mut states = gateway.watch_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            if state == ConnectionState::Disconnected {
                let status = gateway.status();
                warn!(
                    "Broker link down (received {}, sent {}, last error: {})",
                    status.messages_received,
                    status.messages_sent,
                    status.last_error.as_deref().unwrap_or("none")
                );
            } else {
                info!("Broker link {:?}", state);
            }
        }
    })
}

#[cfg(feature = "gpio")]
fn actuator() -> Result<Box<dyn Actuator>> {
    use thermolink::device::gpio::{GpioActuator, IndicatorPins};

    let gpio = GpioActuator::new(IndicatorPins::default())
        .map_err(|e| eyre!("Failed to claim indicator pins: {}", e))?;
    Ok(Box::new(gpio))
}

#[cfg(not(feature = "gpio"))]
fn actuator() -> Result<Box<dyn Actuator>> {
    Ok(Box::new(thermolink::device::LogActuator::default()))
}

async fn run_device(settings: Settings) -> Result<()> {
    info!("Starting device endpoint");
    let hardware = DeviceHardware {
        sensor: Box::new(SimulatedSensor::from_settings(&settings.device)),
        actuator: actuator()?,
        link: Box::new(AlwaysUp),
    };
    let controller = DeviceController::with_mqtt(&settings, hardware);
    let link = watch_link(controller.broker().clone());

    let shutdown = CancellationToken::new();
    let control_loop = tokio::spawn(controller.run(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown.cancel();
    let stopped = control_loop
        .await
        .map_err(|e| eyre!("Device control loop panicked: {}", e));
    link.abort();
    stopped
}

async fn run_console(settings: Settings) -> Result<()> {
    info!("Starting console endpoint");
    let dashboard = LogDashboard::new(settings.dashboard.title.clone());
    let mut console = ConsoleController::with_mqtt(&settings, Box::new(dashboard));
    let link = watch_link(console.broker().clone());
    console.start().await;

    info!("Type `on` or `off` to control the indicator, Ctrl+C to quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => match ControlCommand::parse(&line) {
                    Some(command) => {
                        if let Err(e) = console.send_indicator_command(command == ControlCommand::On) {
                            debug!("Command not delivered: {}", e);
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => warn!("Unknown command `{}`, expected `on` or `off`", line.trim()),
                },
                Ok(None) => {
                    debug!("stdin closed, waiting for Ctrl+C");
                    (&mut ctrl_c).await?;
                    break;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    (&mut ctrl_c).await?;
                    break;
                }
            },
        }
    }

    info!("Shutdown requested");
    if let Err(e) = console.shutdown().await {
        warn!("Console shutdown incomplete: {}", e);
    }
    link.abort();
    Ok(())
}
