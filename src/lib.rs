// src/lib.rs
//
// KM271 → MQTT gateway.
//
// Wiring: the blocking serial task drives the link (codec → session →
// decoder → status store), decoded values flow through the notification
// channel to the MQTT task, and inbound `/cmd/...` messages arm the send
// slot that the session transmits at the next send window.

#[macro_use]
mod logging;

mod commands;
mod decoder;
pub mod io;
mod settings;
mod status;

pub use commands::{Command, CommandWriter, SendSlot};
pub use decoder::PayloadDecoder;
pub use io::error::{GatewayError, LinkError};
pub use io::Publisher;
pub use settings::{load_settings, save_settings, AppSettings};
pub use status::{StatusSnapshot, StatusStore};

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use io::km271::reader::{spawn_link, LinkConfig};
use io::km271::session::Session;
use io::mqtt::{run_mqtt, MqttConfig};

/// Run the gateway until ctrl-c or until the serial link dies.
pub async fn run(config_path: &Path) -> Result<(), GatewayError> {
    let settings = settings::load_settings(config_path)?;
    if let Some(dir) = &settings.reports_dir {
        logging::mirror_to_dir(Path::new(dir));
    }
    tlog!(
        "[gateway] starting: {} -> mqtt://{}:{} (base '{}')",
        settings.serial_port,
        settings.mqtt_host,
        settings.mqtt_port,
        settings.base_topic
    );

    let (publisher, notifications) =
        Publisher::new(&settings.base_topic, settings.mqtt_retain);
    let store = StatusStore::new();
    let slot = SendSlot::new();
    let log_mode = Arc::new(AtomicBool::new(false));
    let stop = Arc::new(AtomicBool::new(false));

    let decoder = PayloadDecoder::new(store.clone(), publisher.clone());
    let session = Session::new(decoder, slot.clone(), log_mode.clone());
    let command_writer = CommandWriter::new(slot.clone(), publisher.clone());

    let mqtt_task = tokio::spawn(run_mqtt(
        MqttConfig::from_settings(&settings),
        notifications,
        command_writer,
        stop.clone(),
    ));
    let info_task = tokio::spawn(info_loop(
        publisher.clone(),
        log_mode.clone(),
        slot.clone(),
        Duration::from_secs(settings.info_interval_secs.max(1)),
        stop.clone(),
    ));

    let link_config = LinkConfig {
        port_path: settings.serial_port.clone(),
        baud_rate: settings.baud_rate,
        read_timeout: Duration::from_millis(settings.read_timeout_ms),
        watchdog: match settings.link_watchdog_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        },
    };
    let mut link_task = spawn_link(link_config, session, stop.clone())?;

    let link_still_running = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tlog!("[gateway] shutdown requested");
            true
        }
        _ = &mut link_task => {
            tlog!("[gateway] serial link ended");
            false
        }
    };

    stop.store(true, Ordering::SeqCst);
    if link_still_running {
        let _ = link_task.await;
    }
    // The info ticker may be mid-sleep; don't wait out its interval.
    info_task.abort();
    let _ = info_task.await;
    let _ = mqtt_task.await;
    logging::close_mirror();
    Ok(())
}

/// Periodically publish the gateway's own state on `/info`.
async fn info_loop(
    publisher: Publisher,
    log_mode: Arc<AtomicBool>,
    slot: SendSlot,
    interval: Duration,
    stop: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let payload = serde_json::json!({
            "logmode": log_mode.load(Ordering::Relaxed),
            "send_cmd_busy": slot.pending(),
            "date-time": chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        });
        publisher.publish("/info", payload.to_string());
    }
}
