use bitflags::bitflags;

bitflags! {
    // Bit positions [ CWR, ECE, URG, ACK, PSH, RST, SYN, FIN ]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        const CWR = 1 << 7;
        const ECE = 1 << 6;
        const URG = 1 << 5;
        const ACK = 1 << 4;
        const PSH = 1 << 3;
        const RST = 1 << 2;
        const SYN = 1 << 1;
        const FIN = 1 << 0;
    }
}

impl TcpFlags {
    /// The control bits of a knock probe.
    pub const PROBE: TcpFlags = TcpFlags::SYN;

    /// True when the segment only asks to open a connection.
    pub fn is_bare_syn(self) -> bool {
        self == TcpFlags::SYN
    }
}

// -- Unit tests --
