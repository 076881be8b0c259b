use std::net::Ipv4Addr;
use crate::packet::checksum::Checksum;
use crate::packet::errors::HeaderError;
use crate::packet::pseudo_header::PseudoHeader;
use crate::packet::tcp_flags::TcpFlags;

/// Fixed TCP header length, data offset 5 and no options.
pub const HEADER_LEN: usize = 20;

/// Byte offset of the checksum field in the TCP header.
pub const CHECKSUM_OFFSET: usize = 16;

/// Source port every knock probe is sent from.
pub const PROBE_SRC_PORT: u16 = 0x1337;

/// A half-open knock probe: a bare SYN with the knock payload riding after the header.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Source Port          |       Destination Port        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        Sequence Number                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Acknowledgment Number                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Data |       |C|E|U|A|P|R|S|F|                               |
/// | Offset| Rsrvd |W|C|R|C|S|S|Y|I|            Window             |
/// |       |       |R|E|G|K|H|T|N|N|                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           Checksum            |         Urgent Pointer        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             data                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SynSegment {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_no: u32,
    pub ack_no: u32,
    pub flags: TcpFlags,
    pub window: u16,
    pub urgent: u16,
    pub payload: Vec<u8>,
}

impl SynSegment {
    pub fn new(src_port: u16, dst_port: u16, payload: &[u8]) -> Self {
        SynSegment {
            src_port,
            dst_port,
            seq_no: 0,
            ack_no: 0,
            flags: TcpFlags::PROBE,
            window: 0,
            urgent: 0,
            payload: payload.to_vec(),
        }
    }

    /// Header plus payload length, as carried in the pseudo-header.
    pub fn segment_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serialize with a zeroed checksum field.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.segment_len()];

        buf[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        buf[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        buf[4..8].copy_from_slice(&self.seq_no.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ack_no.to_be_bytes());
        buf[12] = ((HEADER_LEN / 4) as u8) << 4; // Reserved bits stay 0
        buf[13] = self.flags.bits();
        buf[14..16].copy_from_slice(&self.window.to_be_bytes());
        buf[16..18].fill(0); // Checksum placeholder
        buf[18..20].copy_from_slice(&self.urgent.to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        buf
    }

    /// Serialize and checksum in one step.
    pub fn to_bytes(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Result<Vec<u8>, HeaderError> {
        let segment_len = u16::try_from(self.segment_len()).map_err(|_| HeaderError::SegmentTooLong(self.segment_len()))?;
        let pseudo = PseudoHeader::new(src_ip, dst_ip, segment_len);
        with_checksum(self.encode(), &pseudo)
    }
}

/// Recompute the checksum of an encoded segment and patch it in place.
pub fn with_checksum(mut segment: Vec<u8>, pseudo: &PseudoHeader) -> Result<Vec<u8>, HeaderError> {
    if segment.len() < HEADER_LEN {
        return Err(HeaderError::BufferTooSmall { expected: HEADER_LEN, found: segment.len() });
    }

    segment[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].fill(0);

    let checksum = Checksum::new()
        .add_bytes(&pseudo.to_bytes())
        .add_bytes(&segment)
        .finish();
    segment[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());

    Ok(segment)
}

// -- Unit tests --
