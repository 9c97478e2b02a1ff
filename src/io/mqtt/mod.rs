// src/io/mqtt/mod.rs
//
// MQTT side of the gateway.
//
// One task owns the client: it drains the notification channel onto the
// broker and subscribes to `<base>/cmd/#`, dispatching integer payloads
// to the command builder. Subscriptions are (re-)established on every
// CONNACK so they survive broker reconnects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::commands::{Command, CommandWriter};
use crate::io::Publication;
use crate::settings::AppSettings;

/// Broker connection parameters (from the settings file).
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub base_topic: String,
}

impl MqttConfig {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            host: settings.mqtt_host.clone(),
            port: settings.mqtt_port,
            username: settings.mqtt_username.clone(),
            password: settings.mqtt_password.clone(),
            client_id: settings.mqtt_client_id.clone(),
            base_topic: settings.base_topic.trim_end_matches('/').to_string(),
        }
    }
}

/// A parsed `<base>/cmd/...` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandRequest {
    Set(Command, i16),
    SetDateTime,
}

/// Run the MQTT client until `stop` is raised or the notification
/// channel closes.
pub async fn run_mqtt(
    config: MqttConfig,
    mut notifications: UnboundedReceiver<Publication>,
    commands: CommandWriter,
    stop: Arc<AtomicBool>,
) {
    let client_id = config
        .client_id
        .clone()
        .unwrap_or_else(|| format!("km271-{}", unique_suffix()));

    let mut options = MqttOptions::new(&client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(30));
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(options, 100);
    let command_filter = format!("{}/cmd/#", config.base_topic);
    tlog!(
        "[mqtt] {} connecting to {}:{}",
        client_id,
        config.host,
        config.port
    );

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        tokio::select! {
            publication = notifications.recv() => match publication {
                Some(p) => {
                    if let Err(e) = client
                        .publish(p.topic.clone(), QoS::AtMostOnce, p.retain, p.payload)
                        .await
                    {
                        tlog!("[mqtt] publish to {} failed: {}", p.topic, e);
                    }
                }
                None => break,
            },
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tlog!("[mqtt] connected, subscribing to {}", command_filter);
                    if let Err(e) = client
                        .subscribe(command_filter.clone(), QoS::AtMostOnce)
                        .await
                    {
                        tlog!("[mqtt] subscribe failed: {}", e);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let payload = String::from_utf8_lossy(&publish.payload);
                    match parse_command(&config.base_topic, &publish.topic, &payload) {
                        Some(CommandRequest::Set(command, value)) => {
                            if let Err(e) = commands.submit(command, value) {
                                tlog!("[mqtt] {}", e);
                            }
                        }
                        Some(CommandRequest::SetDateTime) => commands.set_date_time(),
                        None => tlog!(
                            "[mqtt] ignoring message on '{}' ('{}')",
                            publish.topic,
                            payload
                        ),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tlog!("[mqtt] connection error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            },
            // Periodic wakeup so a raised stop flag is honoured promptly.
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
        }
    }

    let _ = client.disconnect().await;
    tlog!("[mqtt] task stopped");
}

/// Map a command topic and payload to a request.
fn parse_command(base_topic: &str, topic: &str, payload: &str) -> Option<CommandRequest> {
    let name = topic.strip_prefix(base_topic)?.strip_prefix("/cmd/")?;
    if name == "datetime" {
        return Some(CommandRequest::SetDateTime);
    }
    let command = Command::from_label(name)?;
    let value = payload.trim().parse().ok()?;
    Some(CommandRequest::Set(command, value))
}

/// Timestamp-derived suffix for auto-generated client IDs.
fn unique_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{:x}", nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_command() {
        assert_eq!(
            parse_command("buderus/km271", "buderus/km271/cmd/dhw_setpoint", "55"),
            Some(CommandRequest::Set(Command::DhwSetpoint, 55))
        );
        assert_eq!(
            parse_command("buderus/km271", "buderus/km271/cmd/frost_ab", " -15 "),
            Some(CommandRequest::Set(Command::FrostCutoff, -15))
        );
    }

    #[test]
    fn test_parse_datetime_command() {
        assert_eq!(
            parse_command("km271", "km271/cmd/datetime", ""),
            Some(CommandRequest::SetDateTime)
        );
    }

    #[test]
    fn test_parse_rejects_foreign_topics_and_bad_payloads() {
        assert_eq!(parse_command("km271", "other/cmd/dhw_setpoint", "55"), None);
        assert_eq!(parse_command("km271", "km271/status/DHW_setpoint", "55"), None);
        assert_eq!(parse_command("km271", "km271/cmd/unknown", "1"), None);
        assert_eq!(parse_command("km271", "km271/cmd/dhw_setpoint", "warm"), None);
    }
}
