// src/io/km271/mod.rs
//
// KM271 / Ecomatic 2000 link driver: 3964R-variant frame codec, the
// session state machine driving handshake and send window, and the
// blocking serial read task.

pub mod codec;
pub mod reader;
pub mod session;

/// Start of text: block start, and "I have data" prompt in logging mode.
pub const STX: u8 = 0x02;
/// End of text: closes a block together with the preceding DLE.
pub const ETX: u8 = 0x03;
/// Data link escape: acknowledgement, block terminator prefix, and the
/// byte that is doubled on the wire when it appears inside a payload.
pub const DLE: u8 = 0x10;
/// Negative acknowledge: asks the peer to retransmit the last block.
pub const NAK: u8 = 0x15;

/// Maximum payload bytes in one inbound block (framing and BCC excluded).
pub const MAX_BLOCK_LEN: usize = 20;
