// src/io/km271/session.rs
//
// Session state machine for the KM271 link.
//
// The controller owns the logging cycle: after the handshake it emits STX
// before every data block and expects DLE as the acknowledgement. To write
// a command the gateway answers an STX prompt with its own STX, waits for
// the controller's DLE ("ready to receive") and only then transmits the
// 8-byte command block. A completed write drops the session back to the
// start of the handshake so the controller re-emits all mutated registers.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::codec::{encode_block, FrameCodec, LinkEvent};
use super::{DLE, NAK, STX};
use crate::commands::SendSlot;
use crate::decoder::PayloadDecoder;

/// Handshake states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting to re-arm logging mode.
    Start,
    /// Log-mode request sent, waiting for the controller's confirmation.
    LogCommandIssued,
    /// Logging mode active: the controller streams register updates.
    Logging,
}

/// Payload that switches the controller into logging mode.
const LOG_MODE_REQUEST: [u8; 3] = [0xEE, 0x00, 0x00];

/// Drives the KM271 link: frame codec, handshake and send window.
///
/// `feed` is called with each received byte by the serial read task, which
/// is the sole mutator of session and codec state. Responses are written
/// to the supplied sink (the serial port; a `Vec<u8>` in tests).
pub struct Session {
    codec: FrameCodec,
    state: SessionState,
    slot: SendSlot,
    decoder: PayloadDecoder,
    log_mode: Arc<AtomicBool>,
}

impl Session {
    pub fn new(decoder: PayloadDecoder, slot: SendSlot, log_mode: Arc<AtomicBool>) -> Self {
        Self {
            codec: FrameCodec::new(),
            state: SessionState::Start,
            slot,
            decoder,
            log_mode,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Feed one received byte; any response bytes are written to `port`.
    pub fn feed<W: Write>(&mut self, byte: u8, port: &mut W) -> io::Result<()> {
        if let Some(event) = self.codec.push_byte(byte) {
            self.handle_event(event, port)?;
        }
        self.log_mode
            .store(self.state == SessionState::Logging, Ordering::Relaxed);
        Ok(())
    }

    /// Force the link back to its initial state (watchdog or reconnect).
    pub fn reset(&mut self) {
        self.codec.resync();
        self.state = SessionState::Start;
        self.log_mode.store(false, Ordering::Relaxed);
    }

    fn handle_event<W: Write>(&mut self, event: LinkEvent, port: &mut W) -> io::Result<()> {
        match event {
            LinkEvent::Control(byte) => self.handle_control(byte, port),
            LinkEvent::Block(block) => self.handle_block(&block, port),
            LinkEvent::Reject(err) => {
                // Bad BCC: ask the peer to retransmit. Session state is
                // untouched, the retransmission replays the same event.
                tlog!("[km271] {}, sending NAK", err);
                send(port, &[NAK])
            }
            LinkEvent::Dropped(err) => {
                tlog!("[km271] {}", err);
                Ok(())
            }
        }
    }

    fn handle_control<W: Write>(&mut self, byte: u8, port: &mut W) -> io::Result<()> {
        match self.state {
            SessionState::Start => match byte {
                STX => send(port, &[STX]),
                DLE => {
                    send(port, &LOG_MODE_REQUEST)?;
                    self.state = SessionState::LogCommandIssued;
                    Ok(())
                }
                _ => Ok(()),
            },
            SessionState::LogCommandIssued => {
                self.state = if byte == DLE {
                    tlog!("[km271] logging mode active");
                    SessionState::Logging
                } else {
                    SessionState::Start
                };
                Ok(())
            }
            SessionState::Logging => match byte {
                STX => {
                    if self.slot.pending() {
                        // Claim the send window instead of acknowledging.
                        send(port, &[STX])
                    } else {
                        send(port, &[DLE])
                    }
                }
                DLE => {
                    // Controller is ready to receive: transmit the armed
                    // command and re-prime logging so mutated registers
                    // are re-emitted.
                    let buf = self.slot.take();
                    send(port, &buf)?;
                    self.state = SessionState::Start;
                    Ok(())
                }
                _ => Ok(()),
            },
        }
    }

    fn handle_block<W: Write>(&mut self, block: &[u8], port: &mut W) -> io::Result<()> {
        match self.state {
            SessionState::Start => Ok(()),
            SessionState::LogCommandIssued => {
                self.state = SessionState::Start;
                Ok(())
            }
            SessionState::Logging => {
                // Decode (and publish) before the acknowledgement goes out.
                self.decoder.handle_block(block);
                send(port, &[DLE])
            }
        }
    }
}

fn send<W: Write>(port: &mut W, payload: &[u8]) -> io::Result<()> {
    port.write_all(&encode_block(payload))
}
