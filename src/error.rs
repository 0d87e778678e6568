use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("interface {name} not found")]
    InterfaceNotFound { name: String },

    #[error("invalid RA: {0}")]
    InvalidRa(String),

    #[error("illegal instruction: {0}")]
    IllegalInstruction(String),

    #[error("keepalive slot {0} is occupied")]
    SlotOccupied(u32),

    #[error("invalid keepalive: {0}")]
    InvalidKeepalive(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("program of {size} bytes exceeds the {max} byte limit")]
    ProgramTooLarge { size: usize, max: usize },

    #[error("install failed: {0}")]
    Install(String),
}

pub type Result<T> = std::result::Result<T, Error>;
