use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use log::{error, info, warn};

mod config;
mod debounce;
mod messages;
mod monitor;
mod mqtt;
mod notifier;
mod source;
mod store;
mod tuya;

use crate::debounce::SystemClock;
use crate::monitor::Monitor;
use crate::mqtt::MqttNotifier;
use crate::notifier::{Notifiers, TelegramNotifier};
use crate::source::StatusSource as _;
use crate::store::{FileStateStore, StateStore as _};
use crate::tuya::TuyaClient;

const MQTT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Announces mains power outages by watching whether a Tuya device is online.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML config. Ignored when TUYA_ACCESS_ID is set in the environment.
    #[arg(short, long, env = "POWER_MONITOR_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Command {
    /// Poll the device forever at the configured interval.
    #[default]
    Run,
    /// Run a single poll cycle and exit.
    Once,
    /// Send a test notification and exit.
    Test,
    /// Query the device and print what the cloud reports about it.
    Probe,
    /// Print the stored debounce state.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::formatted_timed_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config = config::AppConfig::load(&cli.config)?;
    let command = cli.command.unwrap_or_default();

    let store = FileStateStore::new(config.state_path());
    match command {
        Command::Status => {
            let record = store.load().await;
            println!("State file: {}", store.path().display());
            println!("{}", record.state.summary());
            if record.notify_failed {
                println!("Last notification failed to deliver");
            }
            return Ok(());
        }
        Command::Probe => {
            let client = TuyaClient::new(&config.tuya)?;
            let details = client
                .device_details(&config.tuya.device_id)
                .await
                .context("querying device")?;
            let online = match details.online {
                Some(true) => "ONLINE",
                Some(false) => "OFFLINE",
                None => "UNKNOWN",
            };
            println!("Device {}: {}", config.tuya.device_id, online);
            println!("Name: {}", details.name.as_deref().unwrap_or("N/A"));
            println!("Category: {}", details.category.as_deref().unwrap_or("N/A"));
            return Ok(());
        }
        Command::Run | Command::Once | Command::Test => {}
    }

    let mut notifiers = Notifiers::default();
    if let Some(telegram) = &config.telegram {
        notifiers.push(TelegramNotifier::new(telegram)?);
    }
    let mqtt = config.mqtt.as_ref().map(|mqtt_config| {
        let (client, eventloop) = MqttNotifier::new(mqtt_config, config.device_name());
        let handle = tokio::spawn(MqttNotifier::event_loop(eventloop));
        notifiers.push(client.clone());
        (client, handle)
    });
    if notifiers.is_empty() {
        warn!("No notification backend configured; state changes will only be logged");
    }

    let monitor = Monitor::new(
        TuyaClient::new(&config.tuya)?,
        notifiers,
        store,
        SystemClock,
        config.tuya.device_id.clone(),
        config.settings.debounce(),
        config.settings.timezone(),
    );

    let result = match command {
        Command::Test => monitor.send_test().await.map_err(anyhow::Error::from),
        Command::Once => monitor
            .run_cycle()
            .await
            .map(|report| {
                info!(
                    "Cycle complete: online={} notified={} ({})",
                    report.device_online,
                    report.notification_sent,
                    report.state.summary()
                )
            })
            .map_err(anyhow::Error::from),
        _ => {
            monitor.run_loop(config.settings.poll_interval()).await;
            Ok(())
        }
    };

    if let Some((client, handle)) = mqtt {
        if let Err(err) = client.disconnect() {
            error!("Error disconnecting MQTT client: {:?}", err);
        } else if tokio::time::timeout(MQTT_FLUSH_TIMEOUT, handle).await.is_err() {
            warn!("MQTT event loop did not finish within {MQTT_FLUSH_TIMEOUT:?}");
        }
    }

    result
}
