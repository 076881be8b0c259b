//! Port knocking: authenticate a remote host by the order of its connection
//! attempts to a secret sequence of ports.

pub mod errors;
pub mod knock;
pub mod listener;
pub mod packet;
pub mod rawsocket;
pub mod sender;

// -- Re-export the everyday API

pub use errors::KnockError;
pub use knock::{demo_sequence, Knock, Transport};
pub use listener::{start, start_with, ListenerConfig, ListenerHandle};
pub use sender::{send, send_with, RetryPolicy, Sender, SimpleSender, StealthSender};
