//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent wrapper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// file is an invalid grf container
    #[error("file is an invalid grf container")]
    #[diagnostic(help("the file does not start with the \"Master of Magic\" signature"))]
    InvalidArchive,

    /// the header is shorter than the fixed 46 bytes
    #[error("the header is too short ({0} bytes)")]
    HeaderTooShort(u64),

    /// the container uses a version this library cannot read
    #[error("unsupported grf version 0x{0:X}")]
    UnsupportedVersion(u32),

    /// the file table is structurally broken
    #[error("corrupted file table: {0}")]
    CorruptedTable(String),

    /// an entry could not be decoded
    #[error("entry {0} is corrupted or encrypted")]
    #[diagnostic(help("the payload does not start with a known compression marker"))]
    CorruptedOrEncryptedEntry(String),

    /// an encryption key is required but none has been set
    #[error("no encryption key has been set")]
    #[diagnostic(help("validate a key on the container before reading encrypted content"))]
    NoKeySet,

    /// the provided encryption key does not match the container
    #[error("the encryption key is wrong")]
    WrongKey,

    /// the codec failed
    #[error("compression failed: {0}")]
    Compression(String),

    /// the container would outgrow the 32 bit offset space of its version
    #[error("the container would exceed the 4 GiB offset space of its version")]
    #[diagnostic(help("save the container as version 0x300 instead"))]
    CapacityExceeded,

    /// the operation was cancelled
    #[error("the operation was cancelled")]
    Cancelled,

    /// a save to this container is in progress
    #[error("a save to this container is in progress")]
    SaveInProgress,

    /// the container is closed
    #[error("the container is closed")]
    ContainerClosed,

    /// unable to find requested file
    #[error("unable to find requested file")]
    FileNotFound(#[from] FileNotFoundError),

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

/// Error type to provide further information when a file has not been found
#[derive(Error, Diagnostic, Debug)]
#[error("unable to find requested file")]
pub enum FileNotFoundError {
    /// at index {0}
    #[error("at index {0}")]
    Index(usize),

    /// by name {0}
    #[error("by name {0}")]
    Name(String),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
