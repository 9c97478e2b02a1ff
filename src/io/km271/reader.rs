// src/io/km271/reader.rs
//
// Blocking serial task driving the KM271 link.
//
// One byte is read per iteration with a timeout; each received byte is
// pushed through the session (codec + state machine), which writes its
// responses straight back to the port. This task is the sole mutator of
// link state. A timeout simply loops; the optional watchdog forces a
// resync when the controller goes quiet for too long.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serialport::{DataBits, Parity, SerialPort, StopBits};

use super::session::Session;
use crate::io::error::GatewayError;

/// Serial link parameters (from the settings file).
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub port_path: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    /// Force the session back to start when no byte arrives for this long.
    pub watchdog: Option<Duration>,
}

/// Open the serial port and spawn the blocking read loop.
///
/// Fails fast when the port cannot be opened; afterwards the loop runs
/// until `stop` is raised or the port goes away.
pub fn spawn_link(
    config: LinkConfig,
    session: Session,
    stop: Arc<AtomicBool>,
) -> Result<tokio::task::JoinHandle<()>, GatewayError> {
    let port = serialport::new(&config.port_path, config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(config.read_timeout)
        .open()
        .map_err(|source| GatewayError::Serial {
            port: config.port_path.clone(),
            source,
        })?;

    tlog!(
        "[km271] {} open ({} baud 8N1)",
        config.port_path,
        config.baud_rate
    );

    let watchdog = config.watchdog;
    Ok(tokio::task::spawn_blocking(move || {
        read_loop(port, session, stop, watchdog)
    }))
}

fn read_loop(
    mut port: Box<dyn SerialPort>,
    mut session: Session,
    stop: Arc<AtomicBool>,
    watchdog: Option<Duration>,
) {
    let mut byte = [0u8; 1];
    let mut last_byte = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        match port.read(&mut byte) {
            Ok(0) => {
                tlog!("[km271] port closed, link task ending");
                break;
            }
            Ok(_) => {
                last_byte = Instant::now();
                if let Err(e) = session.feed(byte[0], &mut port) {
                    tlog!("[km271] write failed: {}, link task ending", e);
                    break;
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                if let Some(limit) = watchdog {
                    if last_byte.elapsed() >= limit {
                        tlog!(
                            "[km271] no data for {}s, forcing resync",
                            limit.as_secs()
                        );
                        session.reset();
                        last_byte = Instant::now();
                    }
                }
            }
            Err(e) => {
                tlog!("[km271] read failed: {}, link task ending", e);
                break;
            }
        }
    }

    tlog!("[km271] link task stopped");
}
