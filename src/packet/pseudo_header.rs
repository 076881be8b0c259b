use std::net::Ipv4Addr;

/// IP protocol number for TCP.
pub const PROTOCOL_TCP: u8 = 6;

/// Length of the pseudo-header in bytes.
pub const PSEUDO_HEADER_LEN: usize = 12;

/// The IPv4 pseudo-header the TCP checksum is computed over. Never sent.
///
/// ```text
/// +--------+--------+--------+--------+
/// |           Source Address          |
/// +--------+--------+--------+--------+
/// |         Destination Address       |
/// +--------+--------+--------+--------+
/// |  zero  |  PTCL  |    TCP Length   |
/// +--------+--------+--------+--------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PseudoHeader {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub protocol: u8,
    pub segment_len: u16, // TCP header + payload
}

impl PseudoHeader {
    pub fn new(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, segment_len: u16) -> Self {
        PseudoHeader {
            src_ip,
            dst_ip,
            protocol: PROTOCOL_TCP,
            segment_len,
        }
    }

    pub fn to_bytes(&self) -> [u8; PSEUDO_HEADER_LEN] {
        let mut buf = [0u8; PSEUDO_HEADER_LEN];
        buf[0..4].copy_from_slice(&self.src_ip.octets());
        buf[4..8].copy_from_slice(&self.dst_ip.octets());
        buf[8] = 0;
        buf[9] = self.protocol;
        buf[10..12].copy_from_slice(&self.segment_len.to_be_bytes());
        buf
    }
}

// -- Unit tests --

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pseudo_header_to_bytes() {
        let pseudo = PseudoHeader::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 20);
        assert_eq!(pseudo.to_bytes().to_vec(), hex::decode("0a0000010a00000200060014").unwrap());
    }
}
