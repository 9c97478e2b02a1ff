// src/commands.rs
//
// Write commands towards the controller.
//
// Every command is an 8-byte block: byte 0 selects the data type, byte 1
// the register offset, and exactly one positional byte carries the
// parameter. Everything else stays 0x65, the controller's "do not
// modify" filler. Commands are validated here and armed into the single
// send slot; the session manager transmits the slot at the next send
// window the controller grants.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Datelike, Local, Offset, TimeZone, Timelike};

use crate::io::error::LinkError;
use crate::io::Publisher;

/// "Do not modify" filler byte.
pub const UNCHANGED: u8 = 0x65;

/// The supported write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Hk1OperatingMode,
    Hk1DesignTemperature,
    Hk1Program,
    DhwOperatingMode,
    SummerThreshold,
    FrostCutoff,
    OutdoorHold,
    DhwSetpoint,
}

impl Command {
    /// Resolve a command from its catalogue label (also the MQTT command
    /// topic leaf).
    pub fn from_label(label: &str) -> Option<Command> {
        COMMAND_CATALOGUE
            .iter()
            .find(|entry| entry.label == label)
            .map(|entry| entry.command)
    }
}

struct CommandEntry {
    command: Command,
    label: &'static str,
    type_byte: u8,
    offset: u8,
    /// Index of the parameter byte within the 8-byte block.
    slot: usize,
    min: i16,
    max: i16,
}

static COMMAND_CATALOGUE: &[CommandEntry] = &[
    CommandEntry {
        command: Command::Hk1OperatingMode,
        label: "hk1_betriebsart",
        type_byte: 0x07,
        offset: 0x00,
        slot: 6,
        min: 0,
        max: 2,
    },
    CommandEntry {
        command: Command::Hk1DesignTemperature,
        label: "hk1_auslegung",
        type_byte: 0x07,
        offset: 0x0E,
        slot: 6,
        min: 30,
        max: 90,
    },
    CommandEntry {
        command: Command::Hk1Program,
        label: "hk1_programm",
        type_byte: 0x11,
        offset: 0x00,
        slot: 2,
        min: 0,
        max: 8,
    },
    CommandEntry {
        command: Command::DhwOperatingMode,
        label: "dhw_mode",
        type_byte: 0x0C,
        offset: 0x0E,
        slot: 2,
        min: 0,
        max: 2,
    },
    CommandEntry {
        command: Command::SummerThreshold,
        label: "summer_threshold",
        type_byte: 0x07,
        offset: 0x00,
        slot: 3,
        min: 9,
        max: 31,
    },
    CommandEntry {
        command: Command::FrostCutoff,
        label: "frost_ab",
        type_byte: 0x07,
        offset: 0x31,
        slot: 7,
        min: -20,
        max: 10,
    },
    CommandEntry {
        command: Command::OutdoorHold,
        label: "aussenhalt_ab",
        type_byte: 0x07,
        offset: 0x15,
        slot: 4,
        min: -20,
        max: 10,
    },
    CommandEntry {
        command: Command::DhwSetpoint,
        label: "dhw_setpoint",
        type_byte: 0x0C,
        offset: 0x07,
        slot: 5,
        min: 30,
        max: 60,
    },
];

// ============================================================================
// Send slot
// ============================================================================

#[derive(Default)]
struct SlotState {
    pending: bool,
    buf: [u8; 8],
}

/// The single outbound command slot shared between the command builder
/// (writer) and the session task (consumer).
#[derive(Clone, Default)]
pub struct SendSlot {
    inner: Arc<Mutex<SlotState>>,
}

impl SendSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> bool {
        self.lock().pending
    }

    /// Arm the slot. Returns whether a still-pending command was
    /// overwritten.
    pub(crate) fn arm(&self, buf: [u8; 8]) -> bool {
        let mut state = self.lock();
        let overwritten = state.pending;
        state.buf = buf;
        state.pending = true;
        overwritten
    }

    /// Hand the payload to the caller and clear the pending flag.
    /// Called by the session manager when the send window opens.
    pub(crate) fn take(&self) -> [u8; 8] {
        let mut state = self.lock();
        state.pending = false;
        state.buf
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Command builder
// ============================================================================

/// Validates parameters, lays out command blocks and arms the send slot.
/// Confirmations and rejections go out on `/message`.
pub struct CommandWriter {
    slot: SendSlot,
    publisher: Publisher,
}

impl CommandWriter {
    pub fn new(slot: SendSlot, publisher: Publisher) -> Self {
        Self { slot, publisher }
    }

    /// Submit a write command. In-range values arm the send slot and are
    /// transmitted at the next send window; out-of-range values are
    /// rejected and the slot stays untouched.
    pub fn submit(&self, command: Command, value: i16) -> Result<(), LinkError> {
        let entry = COMMAND_CATALOGUE
            .iter()
            .find(|entry| entry.command == command)
            .expect("every command has a catalogue entry");

        if value < entry.min || value > entry.max {
            self.publisher
                .publish("/message", format!("setvalue: {} - invalid value", entry.label));
            return Err(LinkError::ParameterOutOfRange {
                command: entry.label,
                value,
                min: entry.min,
                max: entry.max,
            });
        }

        let mut buf = [UNCHANGED; 8];
        buf[0] = entry.type_byte;
        buf[1] = entry.offset;
        buf[entry.slot] = value as u8; // two's complement for the signed ranges

        self.arm(buf, entry.label);
        self.publisher
            .publish("/message", format!("setvalue: {} - received", entry.label));
        Ok(())
    }

    /// Arm a date-time block from the local wall clock.
    pub fn set_date_time(&self) {
        let now = Local::now();
        let buf = date_time_payload(&now, is_dst(&now));
        self.arm(buf, "datetime");
        self.publisher.publish("/message", "date and time set!");
    }

    fn arm(&self, buf: [u8; 8], label: &str) {
        if self.slot.arm(buf) {
            self.publisher.publish(
                "/message",
                format!("setvalue: {} - busy, previous command overwritten", label),
            );
        }
    }
}

/// Lay out the date-time command block.
///
/// Seconds, minutes, hours (bit 6 = DST), day of month, month with the
/// day of week in the high nibble (0 = Monday), year − 1900.
fn date_time_payload<Tz: TimeZone>(now: &DateTime<Tz>, dst: bool) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[0] = 0x01;
    buf[1] = 0x00;
    buf[2] = now.second() as u8;
    buf[3] = now.minute() as u8;
    buf[4] = now.hour() as u8;
    if dst {
        buf[4] |= 0x40;
    }
    buf[5] = now.day() as u8;
    buf[6] = (now.month0() as u8) | ((now.weekday().num_days_from_monday() as u8) << 4);
    buf[7] = (now.year() - 1900) as u8;
    buf
}

/// Whether `now` falls in daylight saving time: its UTC offset exceeds the
/// smaller of the January and July offsets (covers both hemispheres).
fn is_dst(now: &DateTime<Local>) -> bool {
    let offset_on = |month: u32| {
        Local
            .with_ymd_and_hms(now.year(), month, 1, 12, 0, 0)
            .single()
            .map(|d| d.offset().fix().local_minus_utc())
    };
    let now_offset = now.offset().fix().local_minus_utc();
    match (offset_on(1), offset_on(7)) {
        (Some(jan), Some(jul)) => now_offset > jan.min(jul),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Publication;
    use chrono::Utc;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn writer() -> (CommandWriter, SendSlot, UnboundedReceiver<Publication>) {
        let (publisher, rx) = Publisher::new("", false);
        let slot = SendSlot::new();
        (CommandWriter::new(slot.clone(), publisher), slot, rx)
    }

    fn messages(rx: &mut UnboundedReceiver<Publication>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(p) = rx.try_recv() {
            assert_eq!(p.topic, "/message");
            out.push(p.payload);
        }
        out
    }

    #[test]
    fn test_dhw_setpoint_layout() {
        let (writer, slot, mut rx) = writer();
        writer.submit(Command::DhwSetpoint, 55).unwrap();
        assert!(slot.pending());
        assert_eq!(
            slot.take(),
            [0x0C, 0x07, 0x65, 0x65, 0x65, 0x37, 0x65, 0x65]
        );
        assert!(!slot.pending());
        assert_eq!(messages(&mut rx), vec!["setvalue: dhw_setpoint - received"]);
    }

    #[test]
    fn test_out_of_range_rejected_without_arming() {
        let (writer, slot, mut rx) = writer();
        let err = writer.submit(Command::DhwSetpoint, 61).unwrap_err();
        assert_eq!(
            err,
            LinkError::ParameterOutOfRange {
                command: "dhw_setpoint",
                value: 61,
                min: 30,
                max: 60,
            }
        );
        assert!(!slot.pending());
        assert_eq!(
            messages(&mut rx),
            vec!["setvalue: dhw_setpoint - invalid value"]
        );
    }

    #[test]
    fn test_design_temperature_range_edges() {
        let (writer, slot, _rx) = writer();
        assert!(writer.submit(Command::Hk1DesignTemperature, 29).is_err());
        assert!(writer.submit(Command::Hk1DesignTemperature, 91).is_err());
        assert!(!slot.pending());
        assert!(writer.submit(Command::Hk1DesignTemperature, 30).is_ok());
        assert_eq!(slot.take()[6], 30);
        assert!(writer.submit(Command::Hk1DesignTemperature, 90).is_ok());
        assert_eq!(slot.take()[6], 90);
    }

    #[test]
    fn test_signed_parameters_encode_twos_complement() {
        let (writer, slot, _rx) = writer();
        writer.submit(Command::FrostCutoff, -20).unwrap();
        let buf = slot.take();
        assert_eq!(buf[0], 0x07);
        assert_eq!(buf[1], 0x31);
        assert_eq!(buf[7], 0xEC);

        writer.submit(Command::OutdoorHold, -1).unwrap();
        assert_eq!(slot.take()[4], 0xFF);
    }

    #[test]
    fn test_overwrite_publishes_busy_notice() {
        let (writer, slot, mut rx) = writer();
        writer.submit(Command::DhwSetpoint, 55).unwrap();
        writer.submit(Command::Hk1Program, 3).unwrap();

        let all = messages(&mut rx);
        assert_eq!(
            all,
            vec![
                "setvalue: dhw_setpoint - received",
                "setvalue: hk1_programm - busy, previous command overwritten",
                "setvalue: hk1_programm - received",
            ]
        );
        // Documented behaviour: the later command wins.
        assert_eq!(slot.take()[0], 0x11);
    }

    #[test]
    fn test_command_from_label() {
        assert_eq!(
            Command::from_label("summer_threshold"),
            Some(Command::SummerThreshold)
        );
        assert_eq!(Command::from_label("no_such_command"), None);
    }

    #[test]
    fn test_date_time_payload_layout() {
        // Friday 2024-03-15 14:30:45.
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 14, 30, 45).unwrap();
        let buf = date_time_payload(&now, false);
        assert_eq!(buf[0], 0x01);
        assert_eq!(buf[1], 0x00);
        assert_eq!(buf[2], 45);
        assert_eq!(buf[3], 30);
        assert_eq!(buf[4], 14);
        assert_eq!(buf[5], 15);
        // month0 = 2, Friday = 4 days from Monday.
        assert_eq!(buf[6], 2 | (4 << 4));
        assert_eq!(buf[7], 124);

        let dst = date_time_payload(&now, true);
        assert_eq!(dst[4], 14 | 0x40);
    }
}
