pub mod checksum;
pub mod errors;
pub mod pseudo_header;
pub mod syn_segment;
pub mod tcp_flags;

// -- Re-export structs for more concise usage

pub use checksum::{checksum, Checksum};
pub use errors::HeaderError;
pub use pseudo_header::PseudoHeader;
pub use syn_segment::{with_checksum, SynSegment, PROBE_SRC_PORT};
pub use tcp_flags::TcpFlags;
