// src/decoder.rs
//
// Payload decoder: maps validated blocks to typed values and MQTT topics.
//
// The first two payload bytes are the big-endian register identifier.
// Identifiers at 0x8000 and above carry spontaneous status values (one
// data byte each); identifiers below 0x8000 are configuration blocks
// whose payload carries several labelled fields at fixed offsets. Both
// dictionaries are plain data tables; decoding is a lookup plus dispatch
// over a handful of numeric rules.

use crate::io::error::LinkError;
use crate::io::Publisher;
use crate::status::StatusStore;

/// Registers at or above this value carry status updates.
const STATUS_REGISTER_BASE: u16 = 0x8000;
/// Peer keep-alive block, deliberately discarded.
const KEEPALIVE_REGISTER: u16 = 0x0400;

// ============================================================================
// Numeric decoders
// ============================================================================

/// Temperature in 0.5 °C steps.
pub fn temp_half(raw: u8) -> f64 {
    raw as f64 / 2.0
}

/// Temperature with negative range: the high half encodes -(256 - raw).
pub fn temp_signed(raw: u8) -> f64 {
    if raw >= 128 {
        -((256 - raw as i32) as f64)
    } else {
        raw as f64
    }
}

// ============================================================================
// Status dictionary (registers >= 0x8000)
// ============================================================================

/// Per-bit topics, LSB first. `None` bits are not published.
type BitTopics = [Option<&'static str>; 8];

enum StatusRule {
    /// Temperature, 1 °C resolution.
    Temp1c(&'static str),
    /// Temperature, 0.5 °C resolution.
    Temp05c(&'static str),
    /// Temperature with negative range.
    TempSigned(&'static str),
    /// Raw byte: minutes, percent, counter bytes, version numbers.
    /// `None` is stored in the snapshot but never published.
    Byte(Option<&'static str>),
    /// Eight flags published individually.
    Bits(&'static BitTopics),
}

struct StatusEntry {
    register: u16,
    rule: StatusRule,
}

static STATUS_DICTIONARY: &[StatusEntry] = &[
    StatusEntry {
        register: 0x8000,
        rule: StatusRule::Bits(&[
            Some("/status/HK1_BW1_off_time_optimization"),
            Some("/status/HK1_BW1_on_time_optimization"),
            Some("/status/HK1_BW1_auto"),
            Some("/status/HK1_BW1_DHW_priority"),
            Some("/status/HK1_BW1__drying"),
            Some("/status/HK1_BW1_holiday"),
            Some("/status/HK1_BW1_frost_protection"),
            Some("/status/HK1_BW1_manual"),
        ]),
    },
    StatusEntry {
        register: 0x8001,
        rule: StatusRule::Bits(&[
            Some("/status/HK1_BW2_summer"),
            Some("/status/HK1_BW2_day"),
            Some("/status/HK1_BW2_no_operation_with_FB"),
            Some("/status/HK1_BW2_FB_faulty"),
            Some("/status/HK1_BW2_failure_flow_sensor"),
            Some("/status/HK1_BW2_flow_at_maximum"),
            Some("/status/HK1_BW2_external_signal_input"),
            None,
        ]),
    },
    StatusEntry {
        register: 0x8002,
        rule: StatusRule::Temp1c("/status/HK1_flow_setpoint"),
    },
    StatusEntry {
        register: 0x8003,
        rule: StatusRule::Temp1c("/status/HK1_flow_temperature"),
    },
    StatusEntry {
        register: 0x8004,
        rule: StatusRule::Temp05c("/status/HK1_room_setpoint"),
    },
    StatusEntry {
        register: 0x8005,
        rule: StatusRule::Temp05c("/status/HK1_room_temperature"),
    },
    StatusEntry {
        register: 0x8006,
        rule: StatusRule::Byte(Some("/status/HK1_on_time_optimization_duration")),
    },
    StatusEntry {
        register: 0x8007,
        rule: StatusRule::Byte(Some("/status/HK1_off_time_optimization_duration")),
    },
    StatusEntry {
        register: 0x8008,
        rule: StatusRule::Byte(Some("/status/HK1_pump")),
    },
    StatusEntry {
        register: 0x8009,
        rule: StatusRule::Byte(Some("/status/HK1_mixer")),
    },
    StatusEntry {
        register: 0x800C,
        rule: StatusRule::Temp1c("/status/HK1_heat_curve_10C"),
    },
    StatusEntry {
        register: 0x800D,
        rule: StatusRule::Temp1c("/status/HK1_heat_curve_0C"),
    },
    StatusEntry {
        register: 0x800E,
        rule: StatusRule::Temp1c("/status/HK1_heat_curve_-10C"),
    },
    StatusEntry {
        register: 0x8424,
        rule: StatusRule::Bits(&[
            Some("/status/DHW_BW1_auto"),
            Some("/status/DHW_BW1_disinfect"),
            Some("/status/DHW_BW1_reload"),
            Some("/status/DHW_BW1_holiday"),
            Some("/status/DHW_BW1_failure_disinfect"),
            Some("/status/DHW_BW1_failure_sensor"),
            Some("/status/DHW_BW1_failure_DHW_stays_cold"),
            Some("/status/DHW_BW1_failure_anode"),
        ]),
    },
    StatusEntry {
        register: 0x8425,
        rule: StatusRule::Bits(&[
            Some("/status/DHW_BW2_load"),
            Some("/status/DHW_BW2_manual"),
            Some("/status/DHW_BW2_reload"),
            Some("/status/DHW_BW2_off_time_optimization"),
            Some("/status/DHW_BW2_on_time_optimization"),
            Some("/status/DHW_BW2_day"),
            Some("/status/DHW_BW2_hot"),
            Some("/status/DHW_BW2_priority"),
        ]),
    },
    StatusEntry {
        register: 0x8426,
        rule: StatusRule::Temp1c("/status/DHW_setpoint"),
    },
    StatusEntry {
        register: 0x8427,
        rule: StatusRule::Temp1c("/status/DHW_temperature"),
    },
    StatusEntry {
        register: 0x8428,
        rule: StatusRule::Byte(Some("/status/DHW_optimization_time")),
    },
    StatusEntry {
        register: 0x8429,
        rule: StatusRule::Bits(&[
            Some("/status/DHW_pump_type_charge"),
            Some("/status/DHW_pump_type_circulation"),
            Some("/status/DHW_pump_type_groundwater_solar"),
            None,
            None,
            None,
            None,
            None,
        ]),
    },
    StatusEntry {
        register: 0x882A,
        rule: StatusRule::Temp1c("/status/boiler_setpoint"),
    },
    StatusEntry {
        register: 0x882B,
        rule: StatusRule::Temp1c("/status/boiler_temperature"),
    },
    StatusEntry {
        register: 0x882C,
        rule: StatusRule::Temp1c("/status/burner_switch_on_temperature"),
    },
    StatusEntry {
        register: 0x882D,
        rule: StatusRule::Temp1c("/status/burner_switch_off_temperature"),
    },
    // Boiler integral bytes: mirrored but not worth publishing.
    StatusEntry {
        register: 0x882E,
        rule: StatusRule::Byte(None),
    },
    StatusEntry {
        register: 0x882F,
        rule: StatusRule::Byte(None),
    },
    StatusEntry {
        register: 0x8830,
        rule: StatusRule::Bits(&[
            Some("/status/boiler_failure_burner"),
            Some("/status/boiler_failure_boiler_sensor"),
            Some("/status/boiler_failure_aux_sensor"),
            Some("/status/boiler_failure_boiler_stays_cold"),
            Some("/status/boiler_failure_exhaust_gas_sensor"),
            Some("/status/boiler_failure_exhaust_gas_over_limit"),
            Some("/status/boiler_failure_safety_chain"),
            Some("/status/boiler_failure_external"),
        ]),
    },
    StatusEntry {
        register: 0x8831,
        rule: StatusRule::Bits(&[
            Some("/status/boiler_state_exhaust_gas_test"),
            Some("/status/boiler_state_stage1"),
            Some("/status/boiler_state_boiler_protection"),
            Some("/status/boiler_state_active"),
            Some("/status/boiler_state_performance_free"),
            Some("/status/boiler_state_performance_high"),
            Some("/status/boiler_state_stage2"),
            None,
        ]),
    },
    StatusEntry {
        register: 0x8832,
        rule: StatusRule::Byte(Some("/status/burner_control")),
    },
    StatusEntry {
        register: 0x8833,
        rule: StatusRule::Temp1c("/status/exhaust_gas_temperature"),
    },
    StatusEntry {
        register: 0x8836,
        rule: StatusRule::Byte(Some("/status/burner_lifetime_minutes65536")),
    },
    StatusEntry {
        register: 0x8837,
        rule: StatusRule::Byte(Some("/status/burner_lifetime_minutes256")),
    },
    StatusEntry {
        register: 0x8838,
        rule: StatusRule::Byte(Some("/status/burner_lifetime_minutes")),
    },
    StatusEntry {
        register: 0x893C,
        rule: StatusRule::TempSigned("/status/outside_temperature"),
    },
    StatusEntry {
        register: 0x893D,
        rule: StatusRule::TempSigned("/status/outside_temperature_damped"),
    },
    StatusEntry {
        register: 0x893E,
        rule: StatusRule::Byte(Some("/status/version_VK")),
    },
    StatusEntry {
        register: 0x893F,
        rule: StatusRule::Byte(Some("/status/version_NK")),
    },
    StatusEntry {
        register: 0x8940,
        rule: StatusRule::Byte(Some("/status/module_id")),
    },
    StatusEntry {
        register: 0xAA42,
        rule: StatusRule::Bits(&[
            Some("/status/ERR_alarm_exhaust"),
            Some("/status/ERR_alarm_02"),
            Some("/status/ERR_alarm_boiler_flow_sensor"),
            Some("/status/ERR_alarm_08"),
            Some("/status/ERR_alarm_burner"),
            Some("/status/ERR_alarm_20"),
            Some("/status/ERR_alarm_HK2-flow_sensor"),
            Some("/status/ERR_alarm_80"),
        ]),
    },
];

// ============================================================================
// Configuration dictionary (registers < 0x8000)
// ============================================================================

static OPERATING_MODES: [&str; 3] = ["night", "day", "auto"];
static DISPLAYS: [&str; 4] = ["auto", "boiler", "DHW", "outdoor"];
static LANGUAGES: [&str; 6] = ["DE", "FR", "IT", "NL", "EN", "PL"];
static REDUCTION_MODES: [&str; 4] = ["off", "fixed", "room", "outdoors"];
static SUMMER_THRESHOLDS: [&str; 23] = [
    "summer", "10 °C", "11 °C", "12 °C", "13 °C", "14 °C", "15 °C", "16 °C", "17 °C", "18 °C",
    "19 °C", "20 °C", "21 °C", "22 °C", "23 °C", "24 °C", "25 °C", "26 °C", "27 °C", "28 °C",
    "29 °C", "30 °C", "winter",
];
static SWITCH_ON_TEMPERATURES: [&str; 11] = [
    "off", "1", "2", "3", "4", "5", "6", "7", "8", "9", "10",
];
static HEATING_SYSTEMS: [&str; 4] = ["off", "radiator", "-", "underfloor"];
static ON_OFF: [&str; 2] = ["off", "on"];
static BUILDING_TYPES: [&str; 3] = ["light", "medium", "heavy"];
static CIRCULATION_INTERVALS: [&str; 8] = ["off", "1", "2", "3", "4", "5", "6", "on"];
static BURNER_TYPES: [&str; 3] = ["1-stage", "2-stage", "modulated"];
static EXHAUST_THRESHOLDS: [&str; 42] = [
    "off", "50", "55", "60", "65", "70", "75", "80", "85", "90", "95", "100", "105", "110", "115",
    "120", "125", "130", "135", "140", "145", "150", "155", "160", "165", "170", "175", "180",
    "185", "190", "195", "200", "205", "210", "215", "220", "225", "230", "235", "240", "245",
    "250",
];
static HEATING_PROGRAMS: [&str; 9] = [
    "custom", "family", "early", "late", "AM", "PM", "noon", "single", "senior",
];

enum ConfigRule {
    /// Label table lookup; `shift` is added to the raw byte before
    /// indexing, `unit` is appended after the label when present.
    Label {
        table: &'static [&'static str],
        shift: i16,
        unit: Option<&'static str>,
    },
    /// Temperature in 0.5 °C steps, "°C" suffix.
    Temp05c,
    /// Signed whole-degree temperature, "°C" suffix.
    TempSigned,
    /// Signed temperature resolved to half-degree steps (the controller
    /// stores the HK1 offset this way), "°C" suffix.
    Temp05cSigned,
    /// Raw byte with "°C" suffix.
    Celsius,
    /// Raw byte, no unit.
    Number,
}

struct ConfigField {
    /// Byte offset into the payload (register identifier included).
    offset: usize,
    topic: &'static str,
    rule: ConfigRule,
}

struct ConfigEntry {
    register: u16,
    fields: &'static [ConfigField],
}

static CONFIG_DICTIONARY: &[ConfigEntry] = &[
    ConfigEntry {
        register: 0x0000,
        fields: &[
            ConfigField {
                offset: 3,
                topic: "/config/summer_mode_threshold",
                rule: ConfigRule::Label {
                    table: &SUMMER_THRESHOLDS,
                    shift: -9,
                    unit: None,
                },
            },
            ConfigField {
                offset: 4,
                topic: "/config/HK1_night_temperature",
                rule: ConfigRule::Temp05c,
            },
            ConfigField {
                offset: 5,
                topic: "/config/HK1_day_temperature",
                rule: ConfigRule::Temp05c,
            },
            ConfigField {
                offset: 6,
                topic: "/config/HK1_operating_mode",
                rule: ConfigRule::Label {
                    table: &OPERATING_MODES,
                    shift: 0,
                    unit: None,
                },
            },
            ConfigField {
                offset: 7,
                topic: "/config/HK1_holiday_temperature",
                rule: ConfigRule::Temp05c,
            },
        ],
    },
    ConfigEntry {
        register: 0x000E,
        fields: &[
            ConfigField {
                offset: 4,
                topic: "/config/HK1_max_temperature",
                rule: ConfigRule::Celsius,
            },
            ConfigField {
                offset: 6,
                topic: "/config/HK1_explanation",
                rule: ConfigRule::Number,
            },
        ],
    },
    ConfigEntry {
        register: 0x0015,
        fields: &[
            ConfigField {
                offset: 2,
                topic: "/config/HK1_switch_on_temperature",
                rule: ConfigRule::Label {
                    table: &SWITCH_ON_TEMPERATURES,
                    shift: 0,
                    unit: Some("°C"),
                },
            },
            ConfigField {
                offset: 4,
                topic: "/config/HK1_switch_off_threshold",
                rule: ConfigRule::TempSigned,
            },
        ],
    },
    ConfigEntry {
        register: 0x001C,
        fields: &[
            ConfigField {
                offset: 3,
                topic: "/config/HK1_reduction_mode",
                rule: ConfigRule::Label {
                    table: &REDUCTION_MODES,
                    shift: 0,
                    unit: None,
                },
            },
            ConfigField {
                offset: 4,
                topic: "/config/HK1_heating_system",
                rule: ConfigRule::Label {
                    table: &HEATING_SYSTEMS,
                    shift: 0,
                    unit: None,
                },
            },
        ],
    },
    ConfigEntry {
        register: 0x0031,
        fields: &[
            ConfigField {
                offset: 5,
                topic: "/config/HK1_temperature_offset",
                rule: ConfigRule::Temp05cSigned,
            },
            ConfigField {
                offset: 6,
                topic: "/config/HK1_remote_control",
                rule: ConfigRule::Label {
                    table: &ON_OFF,
                    shift: 0,
                    unit: None,
                },
            },
            ConfigField {
                offset: 7,
                topic: "/config/frost_protection_cutoff",
                rule: ConfigRule::TempSigned,
            },
        ],
    },
    ConfigEntry {
        register: 0x004D,
        fields: &[ConfigField {
            offset: 3,
            topic: "/config/DHW_priority",
            rule: ConfigRule::Label {
                table: &ON_OFF,
                shift: 0,
                unit: None,
            },
        }],
    },
    ConfigEntry {
        register: 0x0070,
        fields: &[ConfigField {
            offset: 4,
            topic: "/config/building_type",
            rule: ConfigRule::Label {
                table: &BUILDING_TYPES,
                shift: 0,
                unit: None,
            },
        }],
    },
    ConfigEntry {
        register: 0x007E,
        fields: &[ConfigField {
            offset: 5,
            topic: "/config/DHW_temperature",
            rule: ConfigRule::Celsius,
        }],
    },
    ConfigEntry {
        register: 0x0085,
        fields: &[
            ConfigField {
                offset: 2,
                topic: "/config/DHW_operating_mode",
                rule: ConfigRule::Label {
                    table: &OPERATING_MODES,
                    shift: 0,
                    unit: None,
                },
            },
            ConfigField {
                offset: 5,
                topic: "/config/DHW_processing",
                rule: ConfigRule::Label {
                    table: &ON_OFF,
                    shift: 0,
                    unit: None,
                },
            },
            ConfigField {
                offset: 7,
                topic: "/config/DHW_circulation",
                rule: ConfigRule::Label {
                    table: &CIRCULATION_INTERVALS,
                    shift: 0,
                    unit: None,
                },
            },
        ],
    },
    ConfigEntry {
        register: 0x0093,
        fields: &[
            ConfigField {
                offset: 2,
                topic: "/config/language",
                rule: ConfigRule::Label {
                    table: &LANGUAGES,
                    shift: 0,
                    unit: None,
                },
            },
            ConfigField {
                offset: 3,
                topic: "/config/display",
                rule: ConfigRule::Label {
                    table: &DISPLAYS,
                    shift: 0,
                    unit: None,
                },
            },
        ],
    },
    ConfigEntry {
        register: 0x009A,
        fields: &[
            ConfigField {
                offset: 3,
                topic: "/config/burner_type",
                rule: ConfigRule::Label {
                    table: &BURNER_TYPES,
                    shift: -1,
                    unit: None,
                },
            },
            ConfigField {
                offset: 5,
                topic: "/config/max_boiler_temperature",
                rule: ConfigRule::Celsius,
            },
        ],
    },
    ConfigEntry {
        register: 0x00A1,
        fields: &[
            ConfigField {
                offset: 2,
                topic: "/config/pump_logic_temperature",
                rule: ConfigRule::Celsius,
            },
            ConfigField {
                offset: 7,
                topic: "/config/exhaust_gas_temperature_threshold",
                rule: ConfigRule::Label {
                    table: &EXHAUST_THRESHOLDS,
                    shift: -9,
                    unit: None,
                },
            },
        ],
    },
    ConfigEntry {
        register: 0x00A8,
        fields: &[
            ConfigField {
                offset: 2,
                topic: "/config/burner_min_modulation",
                rule: ConfigRule::Number,
            },
            ConfigField {
                offset: 3,
                topic: "/config/burner_modulation_runtime",
                rule: ConfigRule::Number,
            },
        ],
    },
    ConfigEntry {
        register: 0x0100,
        fields: &[ConfigField {
            offset: 2,
            topic: "/config/HK1_program",
            rule: ConfigRule::Label {
                table: &HEATING_PROGRAMS,
                shift: 0,
                unit: None,
            },
        }],
    },
];

// ============================================================================
// Decoder
// ============================================================================

/// Decodes validated blocks into snapshot updates and notifications.
pub struct PayloadDecoder {
    store: StatusStore,
    publisher: Publisher,
}

impl PayloadDecoder {
    pub fn new(store: StatusStore, publisher: Publisher) -> Self {
        Self { store, publisher }
    }

    /// Handle one validated payload block.
    pub fn handle_block(&self, block: &[u8]) {
        if block.len() < 3 {
            self.dump_unparsed(block);
            return;
        }
        let register = u16::from_be_bytes([block[0], block[1]]);
        if register == KEEPALIVE_REGISTER {
            return;
        }
        if register >= STATUS_REGISTER_BASE {
            self.decode_status(register, block[2], block);
        } else {
            self.decode_config(register, block);
        }
    }

    fn decode_status(&self, register: u16, raw: u8, block: &[u8]) {
        let Some(entry) = STATUS_DICTIONARY.iter().find(|e| e.register == register) else {
            tlog!("[decoder] {}", LinkError::UnknownRegister { register });
            self.dump_unparsed(block);
            return;
        };

        let mut scratch = self.store.snapshot();
        scratch.apply(register, raw);

        match &entry.rule {
            StatusRule::Temp1c(topic) => {
                self.publisher.publish(topic, format!("{:.2}", raw as f64));
            }
            StatusRule::Temp05c(topic) => {
                self.publisher.publish(topic, format!("{:.2}", temp_half(raw)));
            }
            StatusRule::TempSigned(topic) => {
                self.publisher
                    .publish(topic, format!("{:.2}", temp_signed(raw)));
            }
            StatusRule::Byte(topic) => {
                if let Some(topic) = topic {
                    self.publisher.publish(topic, raw.to_string());
                }
            }
            StatusRule::Bits(topics) => {
                for (bit, topic) in topics.iter().enumerate() {
                    if let Some(topic) = topic {
                        self.publisher
                            .publish(topic, ((raw >> bit) & 1).to_string());
                    }
                }
            }
        }

        self.store.commit(scratch);
    }

    fn decode_config(&self, register: u16, block: &[u8]) {
        let Some(entry) = CONFIG_DICTIONARY.iter().find(|e| e.register == register) else {
            tlog!("[decoder] {}", LinkError::UnknownRegister { register });
            self.dump_unparsed(block);
            return;
        };

        for field in entry.fields {
            let Some(&raw) = block.get(field.offset) else {
                continue;
            };
            let payload = match &field.rule {
                ConfigRule::Label { table, shift, unit } => {
                    let index = raw as i16 + shift;
                    let Some(label) = usize::try_from(index).ok().and_then(|i| table.get(i))
                    else {
                        tlog!(
                            "[decoder] config 0x{:04X}: index {} out of range for {}",
                            register,
                            index,
                            field.topic
                        );
                        continue;
                    };
                    match unit {
                        Some(unit) => format!("{} {}", label, unit),
                        None => (*label).to_string(),
                    }
                }
                ConfigRule::Temp05c => format!("{:.2} °C", temp_half(raw)),
                ConfigRule::TempSigned => format!("{:.2} °C", temp_signed(raw)),
                ConfigRule::Temp05cSigned => format!("{:.2} °C", temp_signed(raw) / 2.0),
                ConfigRule::Celsius => format!("{} °C", raw),
                ConfigRule::Number => raw.to_string(),
            };
            self.publisher.publish(field.topic, payload);
        }
    }

    /// Hex-dump a block nothing could decode. Debug builds only; release
    /// builds discard silently.
    #[allow(unused_variables)]
    fn dump_unparsed(&self, block: &[u8]) {
        #[cfg(debug_assertions)]
        {
            let dump = block
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join("_");
            self.publisher.publish("/undefinded_message", dump);
        }
    }
}
