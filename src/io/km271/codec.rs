// src/io/km271/codec.rs
//
// Frame codec for the KM271's 3964R protocol variant.
//
// Inbound: a byte-at-a-time state machine that separates bare protocol
// bytes (STX/DLE/NAK) from data blocks. A block is terminated by DLE ETX
// and followed by a block check character: the XOR of every byte since
// block start, including the stuffing, terminator and BCC itself, so a
// valid block leaves a running value of zero. A DLE inside a block is
// doubled on the wire.
//
// Outbound: the symmetric encoder. Single protocol bytes go out verbatim;
// everything else is DLE-stuffed and suffixed with `DLE ETX BCC`.

use super::{DLE, ETX, MAX_BLOCK_LEN, NAK, STX};
use crate::io::error::LinkError;

/// Byte-level receive states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    /// Desynchronised: discard everything until an STX.
    Resync,
    /// Between blocks: protocol bytes pass through, anything else opens a block.
    Idle,
    /// Block reception ongoing.
    Receiving,
    /// One DLE seen inside a block: doubling or end of block.
    AfterDle,
    /// Terminator seen, next byte is the BCC.
    AwaitingBcc,
}

/// Events emitted by the inbound state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A bare protocol byte (STX, DLE or NAK) seen outside a block.
    Control(u8),
    /// A validated payload block, framing and BCC stripped.
    Block(Vec<u8>),
    /// A complete block whose BCC did not verify; the peer should resend.
    Reject(LinkError),
    /// A frame abandoned mid-reception; the codec has resynced itself.
    Dropped(LinkError),
}

/// Inbound frame state machine. Feed it one received byte at a time.
pub struct FrameCodec {
    state: RxState,
    bcc: u8,
    buf: [u8; MAX_BLOCK_LEN],
    len: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            state: RxState::Resync,
            bcc: 0,
            buf: [0; MAX_BLOCK_LEN],
            len: 0,
        }
    }

    /// Drop any partial frame and wait for the next STX.
    pub fn resync(&mut self) {
        self.state = RxState::Resync;
        self.len = 0;
    }

    /// Consume one received byte, returning at most one event.
    ///
    /// The running BCC is XORed with every byte up front; block starts
    /// reset it, so by the time the checksum byte arrives the validity
    /// test is simply `bcc == 0`.
    pub fn push_byte(&mut self, byte: u8) -> Option<LinkEvent> {
        self.bcc ^= byte;

        match self.state {
            RxState::Resync => {
                if byte == STX {
                    self.state = RxState::Idle;
                    return Some(LinkEvent::Control(STX));
                }
                None
            }
            RxState::Idle => {
                self.buf[0] = byte;
                self.len = 1;
                self.bcc = byte;
                if byte == STX || byte == DLE || byte == NAK {
                    Some(LinkEvent::Control(byte))
                } else {
                    self.state = RxState::Receiving;
                    None
                }
            }
            RxState::Receiving => {
                if byte == DLE {
                    // Doubling or end of block, decided by the next byte.
                    self.state = RxState::AfterDle;
                    return None;
                }
                if self.len >= MAX_BLOCK_LEN {
                    self.resync();
                    return Some(LinkEvent::Dropped(LinkError::FrameOverflow));
                }
                self.buf[self.len] = byte;
                self.len += 1;
                None
            }
            RxState::AfterDle => {
                if byte == DLE {
                    // Doubled DLE: one literal DLE byte of payload.
                    if self.len >= MAX_BLOCK_LEN {
                        self.resync();
                        return Some(LinkEvent::Dropped(LinkError::FrameOverflow));
                    }
                    self.buf[self.len] = byte;
                    self.len += 1;
                    self.state = RxState::Receiving;
                    None
                } else if byte == ETX {
                    self.state = RxState::AwaitingBcc;
                    None
                } else {
                    self.resync();
                    Some(LinkEvent::Dropped(LinkError::FrameMalformed { got: byte }))
                }
            }
            RxState::AwaitingBcc => {
                self.state = RxState::Idle;
                if self.bcc == 0 {
                    Some(LinkEvent::Block(self.buf[..self.len].to_vec()))
                } else {
                    Some(LinkEvent::Reject(LinkError::BccMismatch {
                        residue: self.bcc,
                    }))
                }
            }
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a payload for transmission.
///
/// Single-byte payloads equal to STX, DLE or NAK are protocol bytes and go
/// out verbatim with no stuffing and no BCC. Everything else is sent as a
/// block: payload with DLEs doubled, then `DLE ETX`, then the BCC over all
/// emitted bytes (stuffing included).
pub fn encode_block(payload: &[u8]) -> Vec<u8> {
    if payload.is_empty() {
        return Vec::new();
    }
    if payload.len() == 1 && matches!(payload[0], STX | DLE | NAK) {
        return payload.to_vec();
    }

    let mut out = Vec::with_capacity(payload.len() + 4);
    let mut bcc = 0u8;
    for &byte in payload {
        bcc ^= byte;
        out.push(byte);
        if byte == DLE {
            bcc ^= byte;
            out.push(byte);
        }
    }
    bcc ^= DLE;
    out.push(DLE);
    bcc ^= ETX;
    out.push(ETX);
    out.push(bcc);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed a byte slice, collecting every emitted event.
    fn feed(codec: &mut FrameCodec, bytes: &[u8]) -> Vec<LinkEvent> {
        bytes.iter().filter_map(|&b| codec.push_byte(b)).collect()
    }

    /// A codec that has already seen one STX (out of resync).
    fn synced_codec() -> FrameCodec {
        let mut codec = FrameCodec::new();
        assert_eq!(codec.push_byte(STX), Some(LinkEvent::Control(STX)));
        codec
    }

    #[test]
    fn test_resync_discards_until_stx() {
        let mut codec = FrameCodec::new();
        assert_eq!(feed(&mut codec, &[0xAA, 0x55, 0x80, NAK, DLE]), vec![]);
        assert_eq!(codec.push_byte(STX), Some(LinkEvent::Control(STX)));
    }

    #[test]
    fn test_idle_passes_protocol_bytes_through() {
        let mut codec = synced_codec();
        assert_eq!(codec.push_byte(DLE), Some(LinkEvent::Control(DLE)));
        assert_eq!(codec.push_byte(NAK), Some(LinkEvent::Control(NAK)));
        assert_eq!(codec.push_byte(STX), Some(LinkEvent::Control(STX)));
    }

    #[test]
    fn test_receive_plain_block() {
        // Payload 80 02 41, wire 80 02 41 10 03 D0.
        let mut codec = synced_codec();
        let events = feed(&mut codec, &[0x80, 0x02, 0x41, DLE, ETX, 0xD0]);
        assert_eq!(events, vec![LinkEvent::Block(vec![0x80, 0x02, 0x41])]);
    }

    #[test]
    fn test_receive_block_with_stuffed_dle() {
        // Payload 0C 10 37: the embedded DLE is doubled on the wire.
        let mut codec = synced_codec();
        let wire = encode_block(&[0x0C, 0x10, 0x37]);
        assert_eq!(wire, vec![0x0C, 0x10, 0x10, 0x37, 0x10, 0x03, 0x28]);
        let events = feed(&mut codec, &wire);
        assert_eq!(events, vec![LinkEvent::Block(vec![0x0C, 0x10, 0x37])]);
    }

    #[test]
    fn test_bcc_mismatch_rejects_block() {
        let mut codec = synced_codec();
        let events = feed(&mut codec, &[0x80, 0x02, 0x41, DLE, ETX, 0xFF]);
        assert_eq!(
            events,
            vec![LinkEvent::Reject(LinkError::BccMismatch { residue: 0x2F })]
        );
        // Codec is back in idle: the retransmission parses cleanly.
        let events = feed(&mut codec, &[0x80, 0x02, 0x41, DLE, ETX, 0xD0]);
        assert_eq!(events, vec![LinkEvent::Block(vec![0x80, 0x02, 0x41])]);
    }

    #[test]
    fn test_overflow_drops_block_and_resyncs() {
        // A full 20-byte block followed by one more non-DLE byte.
        let mut codec = synced_codec();
        let mut bytes = vec![0x80];
        bytes.extend((1..20).map(|i| i as u8 + 0x20));
        assert_eq!(feed(&mut codec, &bytes), vec![]);
        assert_eq!(
            codec.push_byte(0x42),
            Some(LinkEvent::Dropped(LinkError::FrameOverflow))
        );
        // Only an STX gets it going again.
        assert_eq!(codec.push_byte(0x80), None);
        assert_eq!(codec.push_byte(STX), Some(LinkEvent::Control(STX)));
    }

    #[test]
    fn test_dle_followed_by_garbage_resyncs() {
        let mut codec = synced_codec();
        assert_eq!(feed(&mut codec, &[0x80, 0x02, DLE]), vec![]);
        assert_eq!(
            codec.push_byte(0x7F),
            Some(LinkEvent::Dropped(LinkError::FrameMalformed { got: 0x7F }))
        );
    }

    #[test]
    fn test_block_never_exceeds_max_len() {
        // Arbitrary byte soup: no emitted block may exceed MAX_BLOCK_LEN.
        let mut codec = FrameCodec::new();
        let soup: Vec<u8> = (0u16..600).map(|i| (i * 7 + 3) as u8).collect();
        for &byte in &soup {
            if let Some(LinkEvent::Block(block)) = codec.push_byte(byte) {
                assert!(block.len() <= MAX_BLOCK_LEN);
            }
        }
    }

    #[test]
    fn test_encode_log_mode_request() {
        // BCC = EE ^ 00 ^ 00 ^ 10 ^ 03 = FD.
        assert_eq!(
            encode_block(&[0xEE, 0x00, 0x00]),
            vec![0xEE, 0x00, 0x00, 0x10, 0x03, 0xFD]
        );
    }

    #[test]
    fn test_encode_single_protocol_bytes_verbatim() {
        assert_eq!(encode_block(&[STX]), vec![STX]);
        assert_eq!(encode_block(&[DLE]), vec![DLE]);
        assert_eq!(encode_block(&[NAK]), vec![NAK]);
        assert_eq!(encode_block(&[]), Vec::<u8>::new());
    }

    #[test]
    fn test_encode_single_data_byte_is_framed() {
        // BCC = 42 ^ 10 ^ 03 = 51.
        assert_eq!(encode_block(&[0x42]), vec![0x42, 0x10, 0x03, 0x51]);
    }

    #[test]
    fn test_encode_doubles_every_dle() {
        let payload = [0x07, DLE, 0x65, DLE, 0x65];
        let wire = encode_block(&payload);
        let dle_count = wire[..wire.len() - 3]
            .iter()
            .filter(|&&b| b == DLE)
            .count();
        assert_eq!(dle_count, 4, "two payload DLEs must appear doubled");
        assert_eq!(&wire[wire.len() - 3..wire.len() - 1], &[DLE, ETX]);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let payloads: &[&[u8]] = &[
            &[0x0C, 0x07, 0x65, 0x65, 0x65, 0x37, 0x65, 0x65],
            &[0x80, 0x02, 0x41],
            &[0x01, 0x00, DLE, 0x1E, 0x0E, 0x0F, 0x22, 0x7E],
            &[0xEE, 0x00, 0x00],
            &[0x42],
            &[DLE, DLE, DLE, 0x00],
        ];
        for payload in payloads {
            let mut codec = synced_codec();
            let events = feed(&mut codec, &encode_block(payload));
            // A leading DLE in the payload is delivered as a control byte
            // before the block opens; the block itself must still carry the
            // full payload when it does not start with a protocol byte.
            if !matches!(payload[0], STX | DLE | NAK) {
                assert_eq!(events, vec![LinkEvent::Block(payload.to_vec())]);
            }
        }
    }
}
