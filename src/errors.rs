use std::io;
use nix::errno::Errno;
use thiserror::Error;
use crate::knock::Transport;
use crate::packet::errors::HeaderError;

#[derive(Error, Debug)]
pub enum KnockError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to bind {transport}:{port}: {source}")]
    Bind {
        transport: Transport,
        port: u16,
        source: io::Error,
    },

    #[error("Knock sequence is empty")]
    EmptySequence,

    #[error("Knock sequence repeats {transport}:{port}")]
    DuplicateStep {
        transport: Transport,
        port: u16,
    },

    #[error("Invalid knock definition: {0}")]
    InvalidKnock(String),

    #[error("Could not resolve host: {0}")]
    Resolve(String),

    #[error("Failed to knock on port {port}: {source}")]
    Send {
        port: u16,
        source: io::Error,
    },

    #[error("Header error: {0}")]
    Header(#[from] HeaderError),

    #[error("Raw socket error: {0}")]
    RawSocket(#[from] Errno), // EPERM without CAP_NET_RAW

    #[error("No local IPv4 address found")]
    LocalAddress,
}
