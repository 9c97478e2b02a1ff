// src/io/error.rs
//
// Error types for the KM271 link and for gateway startup.
//
// None of the link errors are fatal: overflow and malformed frames resync
// the codec, a BCC mismatch is answered with NAK, unknown registers are
// discarded and rejected parameters never arm the send slot.

use thiserror::Error;

/// Errors raised on the KM271 serial link and its command surface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// An inbound block would exceed the 20-byte buffer.
    #[error("frame overflow: block exceeds maximum length, resyncing")]
    FrameOverflow,

    /// A DLE inside a block was followed by neither DLE nor ETX.
    #[error("malformed frame: DLE followed by 0x{got:02X}, resyncing")]
    FrameMalformed { got: u8 },

    /// The received block check character did not verify.
    #[error("BCC mismatch: residue 0x{residue:02X} after checksum byte")]
    BccMismatch { residue: u8 },

    /// The decoder has no dictionary entry for this register.
    #[error("no dictionary entry for register 0x{register:04X}")]
    UnknownRegister { register: u16 },

    /// A write command was submitted with an out-of-range parameter.
    #[error("{command}: value {value} outside {min}..={max}")]
    ParameterOutOfRange {
        command: &'static str,
        value: i16,
        min: i16,
        max: i16,
    },
}

/// Errors that can abort gateway startup or shutdown.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("settings: {0}")]
    Settings(String),

    #[error("serial port {port}: {source}")]
    Serial {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_error_display() {
        let err = LinkError::BccMismatch { residue: 0x2F };
        assert_eq!(
            err.to_string(),
            "BCC mismatch: residue 0x2F after checksum byte"
        );

        let err = LinkError::ParameterOutOfRange {
            command: "dhw_setpoint",
            value: 61,
            min: 30,
            max: 60,
        };
        assert_eq!(err.to_string(), "dhw_setpoint: value 61 outside 30..=60");
    }
}
