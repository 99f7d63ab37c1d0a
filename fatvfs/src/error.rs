//! Error type shared by every layer of the file system.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while operating on an image.
#[derive(Debug, Error)]
pub enum FsError {
    /// The allocator cannot satisfy the combined block request.
    #[error("memory full ({needed} blocks needed, {free} free)")]
    OutOfSpace { needed: u32, free: u32 },

    #[error("{0}: not found")]
    NotFound(String),

    #[error("{0}: directory not empty")]
    NotEmpty(String),

    #[error("{0}: not a directory")]
    NotADirectory(String),

    #[error("{0}: is a directory")]
    IsADirectory(String),

    #[error("{0}: already exists")]
    AlreadyExists(String),

    #[error("{0}: invalid name")]
    InvalidName(String),

    #[error("{0}: source and destination are the same file")]
    SameFile(String),

    /// Magic, geometry or size mismatch when opening an image.
    #[error("invalid filesystem ({0})")]
    InvalidImage(String),

    #[error("{}: image is in use by another process", .0.display())]
    Locked(PathBuf),

    /// A chain walk hit an out-of-range block or looped.
    #[error("corrupt chain ({0})")]
    Corrupt(String),

    /// Reported by the consistency checker.
    #[error("inconsistent image ({0})")]
    Inconsistent(String),

    #[error("host i/o error: {0}")]
    HostIo(#[from] io::Error),
}

pub type FsResult<T> = Result<T, FsError>;
