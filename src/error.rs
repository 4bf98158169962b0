use crate::store::StoreError;
use crate::types::Rect;

/// A frame that could not be turned into a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame of {0} bytes is shorter than its header")]
    ShortFrame(usize),
    #[error("'{opcode}' payload needs at least {needed} bytes, got {got}")]
    ShortPayload { opcode: char, needed: usize, got: usize },
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    #[error("frame length {len} exceeds limit {limit}")]
    Oversized { len: u32, limit: u32 },
}

/// Why a well-formed request was refused. The display text is the failure reply.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("space not set")]
    SpaceNotSet,
    #[error("must have desc")]
    MissingDescription,
    #[error("user not set")]
    UserNotSet,
    #[error("invalid rect {0}")]
    InvalidRect(Rect),
    #[error("conflict with host {0}")]
    Conflict(String),
    #[error("locked rect failed : {0} already existed")]
    AlreadyLocked(Rect),
    #[error("rect not locked : {0}")]
    NotLocked(Rect),
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

/// Anything that stops the binary.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("network: {0}")]
    Io(#[from] std::io::Error),
    #[error("no registry for host {0}")]
    UnknownHost(String),
}
