// src/status.rs
//
// In-memory mirror of the controller registers.
//
// The snapshot is replaced wholesale: the decoder works on a scratch copy
// and commits it back only when something changed, so readers never see a
// half-updated structure. Readers may call `snapshot()` from any task.

use std::sync::{Arc, PoisonError, RwLock};

use crate::decoder::{temp_half, temp_signed};

/// All values mirrored from the heating controller, keyed by the register
/// they originate from. Multi-byte counters stay as their three raw bytes
/// (×1, ×256, ×65536); consumers recombine them as needed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatusSnapshot {
    pub hk1_operating_states_1: u8,       // 0x8000 bitfield
    pub hk1_operating_states_2: u8,       // 0x8001 bitfield
    pub hk1_flow_setpoint: f64,           // 0x8002 °C
    pub hk1_flow_temperature: f64,        // 0x8003 °C
    pub hk1_room_setpoint: f64,           // 0x8004 °C (0.5 °C steps)
    pub hk1_room_temperature: f64,        // 0x8005 °C (0.5 °C steps)
    pub hk1_on_time_optimization: u8,     // 0x8006 minutes
    pub hk1_off_time_optimization: u8,    // 0x8007 minutes
    pub hk1_pump_power: u8,               // 0x8008 percent
    pub hk1_mixer_position: u8,           // 0x8009 percent
    pub hk1_heat_curve_plus_10: f64,      // 0x800C °C
    pub hk1_heat_curve_0: f64,            // 0x800D °C
    pub hk1_heat_curve_minus_10: f64,     // 0x800E °C
    pub dhw_operating_states_1: u8,       // 0x8424 bitfield
    pub dhw_operating_states_2: u8,       // 0x8425 bitfield
    pub dhw_setpoint: f64,                // 0x8426 °C
    pub dhw_temperature: f64,             // 0x8427 °C
    pub dhw_optimization_time: u8,        // 0x8428 minutes
    pub dhw_pump_states: u8,              // 0x8429 bitfield (low 3 bits)
    pub boiler_setpoint: f64,             // 0x882A °C
    pub boiler_temperature: f64,          // 0x882B °C
    pub burner_switch_on_temp: f64,       // 0x882C °C
    pub burner_switch_off_temp: f64,      // 0x882D °C
    pub boiler_integral_1: u8,            // 0x882E (×256), not published
    pub boiler_integral_2: u8,            // 0x882F (×1), not published
    pub boiler_error_states: u8,          // 0x8830 bitfield
    pub boiler_operating_states: u8,      // 0x8831 bitfield
    pub burner_states: u8,                // 0x8832
    pub exhaust_temperature: f64,         // 0x8833 °C
    pub burner_runtime_minutes_65536: u8, // 0x8836
    pub burner_runtime_minutes_256: u8,   // 0x8837
    pub burner_runtime_minutes: u8,       // 0x8838
    pub outside_temperature: f64,         // 0x893C °C, signed
    pub outside_temperature_damped: f64,  // 0x893D °C, signed
    pub version_main: u8,                 // 0x893E
    pub version_sub: u8,                  // 0x893F
    pub module_id: u8,                    // 0x8940
    pub alarm_states: u8,                 // 0xAA42 bitfield
}

impl StatusSnapshot {
    /// Store the raw byte of a status register into its field.
    /// Unknown registers are left to the decoder's dictionary handling.
    pub(crate) fn apply(&mut self, register: u16, raw: u8) {
        match register {
            0x8000 => self.hk1_operating_states_1 = raw,
            0x8001 => self.hk1_operating_states_2 = raw,
            0x8002 => self.hk1_flow_setpoint = raw as f64,
            0x8003 => self.hk1_flow_temperature = raw as f64,
            0x8004 => self.hk1_room_setpoint = temp_half(raw),
            0x8005 => self.hk1_room_temperature = temp_half(raw),
            0x8006 => self.hk1_on_time_optimization = raw,
            0x8007 => self.hk1_off_time_optimization = raw,
            0x8008 => self.hk1_pump_power = raw,
            0x8009 => self.hk1_mixer_position = raw,
            0x800C => self.hk1_heat_curve_plus_10 = raw as f64,
            0x800D => self.hk1_heat_curve_0 = raw as f64,
            0x800E => self.hk1_heat_curve_minus_10 = raw as f64,
            0x8424 => self.dhw_operating_states_1 = raw,
            0x8425 => self.dhw_operating_states_2 = raw,
            0x8426 => self.dhw_setpoint = raw as f64,
            0x8427 => self.dhw_temperature = raw as f64,
            0x8428 => self.dhw_optimization_time = raw,
            0x8429 => self.dhw_pump_states = raw,
            0x882A => self.boiler_setpoint = raw as f64,
            0x882B => self.boiler_temperature = raw as f64,
            0x882C => self.burner_switch_on_temp = raw as f64,
            0x882D => self.burner_switch_off_temp = raw as f64,
            0x882E => self.boiler_integral_1 = raw,
            0x882F => self.boiler_integral_2 = raw,
            0x8830 => self.boiler_error_states = raw,
            0x8831 => self.boiler_operating_states = raw,
            0x8832 => self.burner_states = raw,
            0x8833 => self.exhaust_temperature = raw as f64,
            0x8836 => self.burner_runtime_minutes_65536 = raw,
            0x8837 => self.burner_runtime_minutes_256 = raw,
            0x8838 => self.burner_runtime_minutes = raw,
            0x893C => self.outside_temperature = temp_signed(raw),
            0x893D => self.outside_temperature_damped = temp_signed(raw),
            0x893E => self.version_main = raw,
            0x893F => self.version_sub = raw,
            0x8940 => self.module_id = raw,
            0xAA42 => self.alarm_states = raw,
            _ => {}
        }
    }
}

/// Shared handle to the live snapshot.
///
/// Only the decoder commits; any number of readers may take snapshots
/// concurrently and always observe a previously committed value.
#[derive(Clone, Default)]
pub struct StatusStore {
    inner: Arc<RwLock<StatusSnapshot>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A consistent copy of the current status.
    pub fn snapshot(&self) -> StatusSnapshot {
        *self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `new` if it differs from the live snapshot.
    /// Returns whether a replacement happened.
    pub fn commit(&self, new: StatusSnapshot) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if *guard == new {
            return false;
        }
        *guard = new;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_only_when_changed() {
        let store = StatusStore::new();
        let mut scratch = store.snapshot();
        assert!(!store.commit(scratch), "identical snapshot must not commit");

        scratch.apply(0x8008, 75);
        assert!(store.commit(scratch));
        assert_eq!(store.snapshot().hk1_pump_power, 75);
    }

    #[test]
    fn test_apply_decodes_temperature_fields() {
        let mut snapshot = StatusSnapshot::default();
        snapshot.apply(0x8004, 45); // 0.5 °C steps
        snapshot.apply(0x893C, 0xFB); // signed, -5 °C
        snapshot.apply(0x8833, 180);
        assert_eq!(snapshot.hk1_room_setpoint, 22.5);
        assert_eq!(snapshot.outside_temperature, -5.0);
        assert_eq!(snapshot.exhaust_temperature, 180.0);
    }

    #[test]
    fn test_readers_see_whole_snapshots() {
        let store = StatusStore::new();
        let mut scratch = store.snapshot();
        scratch.apply(0x8002, 65);
        scratch.apply(0x8003, 64);
        store.commit(scratch);

        let read = store.snapshot();
        assert_eq!(read.hk1_flow_setpoint, 65.0);
        assert_eq!(read.hk1_flow_temperature, 64.0);
    }

    #[test]
    fn test_concurrent_readers_only_observe_committed_values() {
        // The writer always commits setpoint == temperature; a torn read
        // would surface as a snapshot where the two fields disagree.
        let store = StatusStore::new();
        let writer_store = store.clone();

        let writer = std::thread::spawn(move || {
            for value in 0..200u8 {
                let mut scratch = writer_store.snapshot();
                scratch.apply(0x8002, value);
                scratch.apply(0x8003, value);
                writer_store.commit(scratch);
            }
        });

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let snapshot = store.snapshot();
                        assert_eq!(
                            snapshot.hk1_flow_setpoint, snapshot.hk1_flow_temperature,
                            "observed a snapshot that was never committed"
                        );
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
