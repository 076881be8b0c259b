pub mod socket;

pub use socket::{lookup_local_ip, new_send_socket, send_segment};
