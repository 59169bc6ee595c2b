//! Wire packet codec.
//!
//! ```text
//! +----------+-----------+------+-----+----------+-----------+---------+
//! | protocol | source id | dest | ttl | sequence |  length   | payload |
//! |  u16 BE  | 32 bytes  |  u8  | u8  |  u32 BE  |  u32 BE   |  bytes  |
//! +----------+-----------+------+-----+----------+-----------+---------+
//! ```
//!
//! `dest` is `0x00` for a single peer, `0xFF` for a broadcast and
//! `0x80 | role` for a multicast. `ttl` counts remaining hops: `0` is
//! unbounded and `1` means the receiver must not relay. `sequence` is
//! assigned by the origin to every broadcast and multicast, so two sends
//! of identical bytes are distinct packets.

use std::sync::Arc;
use thiserror::Error;

use super::{PeerId, PeerRole, ProtocolInfo};

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 2 + 32 + 1 + 1 + 4 + 4;

const DEST_PEER: u8 = 0x00;
const DEST_ALL: u8 = 0xFF;
const DEST_ROLE_FLAG: u8 = 0x80;

/// TTL of a packet that may travel any number of hops.
pub const TTL_UNBOUNDED: u8 = 0;
/// TTL of a packet that must not leave the receiving node.
pub const TTL_LAST_HOP: u8 = 1;

/// Packet codec errors.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("Unknown destination code: {0:#04x}")]
    UnknownDestination(u8),

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Truncated packet: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Addressing mode of a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    /// The directly connected receiver.
    Peer,
    /// Every node in the overlay (or every neighbour, with `TTL_LAST_HOP`).
    All,
    /// Every node holding the role.
    Role(PeerRole),
}

impl Destination {
    pub fn to_byte(self) -> u8 {
        match self {
            Destination::Peer => DEST_PEER,
            Destination::All => DEST_ALL,
            Destination::Role(role) => DEST_ROLE_FLAG | role.as_u8(),
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, PacketError> {
        match byte {
            DEST_PEER => Ok(Destination::Peer),
            DEST_ALL => Ok(Destination::All),
            b if b & DEST_ROLE_FLAG != 0 => PeerRole::from_u8(b & !DEST_ROLE_FLAG)
                .map(Destination::Role)
                .ok_or(PacketError::UnknownDestination(b)),
            b => Err(PacketError::UnknownDestination(b)),
        }
    }
}

/// Decoded fixed-size header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    pub protocol: ProtocolInfo,
    pub src: PeerId,
    pub dest: Destination,
    pub ttl: u8,
    pub seq: u32,
    pub length: usize,
}

impl PacketHeader {
    /// Decodes a header, rejecting payload lengths above `max_payload`.
    pub fn decode(buf: &[u8; HEADER_LEN], max_payload: usize) -> Result<Self, PacketError> {
        let protocol = ProtocolInfo(u16::from_be_bytes([buf[0], buf[1]]));
        let mut src = [0u8; 32];
        src.copy_from_slice(&buf[2..34]);
        let dest = Destination::from_byte(buf[34])?;
        let ttl = buf[35];
        let seq = u32::from_be_bytes([buf[36], buf[37], buf[38], buf[39]]);
        let length = Self::payload_len(buf);
        if length > max_payload {
            return Err(PacketError::PayloadTooLarge {
                size: length,
                max: max_payload,
            });
        }
        Ok(Self {
            protocol,
            src: PeerId(src),
            dest,
            ttl,
            seq,
            length,
        })
    }

    /// Payload length field of a raw header, without validation.
    pub fn payload_len(buf: &[u8; HEADER_LEN]) -> usize {
        u32::from_be_bytes([buf[40], buf[41], buf[42], buf[43]]) as usize
    }

    /// Protocol field of a raw header, without validation.
    pub fn raw_protocol(buf: &[u8; HEADER_LEN]) -> ProtocolInfo {
        ProtocolInfo(u16::from_be_bytes([buf[0], buf[1]]))
    }

    pub fn into_packet(self, payload: Vec<u8>) -> Packet {
        Packet {
            protocol: self.protocol,
            src: self.src,
            dest: self.dest,
            ttl: self.ttl,
            seq: self.seq,
            payload: payload.into(),
        }
    }
}

/// Overlay packet. The payload is shared so a fan-out does not copy it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub protocol: ProtocolInfo,
    pub src: PeerId,
    pub dest: Destination,
    pub ttl: u8,
    pub seq: u32,
    pub payload: Arc<[u8]>,
}

impl Packet {
    pub fn new(
        protocol: ProtocolInfo,
        src: PeerId,
        dest: Destination,
        ttl: u8,
        payload: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            protocol,
            src,
            dest,
            ttl,
            seq: 0,
            payload: payload.into(),
        }
    }

    /// Stamps the origin sequence number.
    pub fn with_seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    /// Copy of this packet for the next hop, or `None` if it must stop here.
    pub fn next_hop(&self) -> Option<Packet> {
        match self.ttl {
            TTL_UNBOUNDED => Some(self.clone()),
            TTL_LAST_HOP => None,
            ttl => Some(Packet {
                ttl: ttl - 1,
                ..self.clone()
            }),
        }
    }

    /// Encodes header and payload into one frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(HEADER_LEN + self.payload.len());
        frame.extend_from_slice(&self.protocol.to_be_bytes());
        frame.extend_from_slice(self.src.as_bytes());
        frame.push(self.dest.to_byte());
        frame.push(self.ttl);
        frame.extend_from_slice(&self.seq.to_be_bytes());
        frame.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }

    /// Decodes a complete frame.
    pub fn decode(frame: &[u8], max_payload: usize) -> Result<Self, PacketError> {
        let header: &[u8; HEADER_LEN] = frame
            .get(..HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or(PacketError::Truncated {
                expected: HEADER_LEN,
                actual: frame.len(),
            })?;
        let header = PacketHeader::decode(header, max_payload)?;
        let body = &frame[HEADER_LEN..];
        if body.len() != header.length {
            return Err(PacketError::Truncated {
                expected: HEADER_LEN + header.length,
                actual: frame.len(),
            });
        }
        Ok(header.into_packet(body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Packet {
        Packet::new(
            ProtocolInfo::new(0x02, 0x01),
            PeerId::new([7u8; 32]),
            Destination::Role(PeerRole::Seed),
            TTL_UNBOUNDED,
            b"hello".to_vec(),
        )
        .with_seq(0x0102_0304)
    }

    #[test]
    fn test_header_layout() {
        let frame = sample().encode();
        assert_eq!(frame.len(), HEADER_LEN + 5);
        assert_eq!(&frame[0..2], &[0x02, 0x01]);
        assert_eq!(frame[34], 0x81);
        assert_eq!(frame[35], TTL_UNBOUNDED);
        assert_eq!(&frame[36..40], &[1, 2, 3, 4]);
        assert_eq!(&frame[40..44], &[0, 0, 0, 5]);
        assert_eq!(Packet::decode(&frame, 1024).unwrap(), sample());
    }

    #[test]
    fn test_oversized_payload_rejected_from_header() {
        let frame = sample().encode();
        let err = Packet::decode(&frame, 4).unwrap_err();
        assert_eq!(err, PacketError::PayloadTooLarge { size: 5, max: 4 });
    }

    #[test]
    fn test_truncated_frame() {
        let frame = sample().encode();
        assert!(matches!(
            Packet::decode(&frame[..HEADER_LEN + 2], 1024),
            Err(PacketError::Truncated { .. })
        ));
        assert!(matches!(
            Packet::decode(&frame[..10], 1024),
            Err(PacketError::Truncated { .. })
        ));
    }

    #[test]
    fn test_unknown_destination() {
        assert_eq!(
            Destination::from_byte(0x42),
            Err(PacketError::UnknownDestination(0x42))
        );
        assert_eq!(
            Destination::from_byte(0x84),
            Err(PacketError::UnknownDestination(0x84))
        );
        assert_eq!(Destination::from_byte(0xFF), Ok(Destination::All));
    }

    #[test]
    fn test_next_hop_ttl() {
        let mut packet = sample();
        assert_eq!(packet.next_hop().unwrap().ttl, TTL_UNBOUNDED);

        packet.ttl = 3;
        assert_eq!(packet.next_hop().unwrap().ttl, 2);

        packet.ttl = TTL_LAST_HOP;
        assert!(packet.next_hop().is_none());
    }
}
