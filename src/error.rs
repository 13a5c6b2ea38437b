use std::io;

use thiserror::Error;

/// An error enum for return from packaging methods that may fail
#[derive(Error, Debug)]
pub enum ShipError {
    /// Requesting a path that doesn't exist in the tree
    #[error("{0}: no such file or directory")]
    NotFound(String),
    /// The architecture or operating system has no code in the lookup table
    #[error("unsupported {kind} {value:?}")]
    UnsupportedPlatform {
        /// Either "architecture" or "operating system"
        kind:  &'static str,
        /// The name that failed to resolve
        value: String,
    },
    /// Unknown package format identifier
    #[error("unsupported format {0:?}")]
    UnsupportedFormat(String),
    /// Metadata that cannot be mapped onto the format's fields
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    /// A write, flush or close failed while producing a sub-stream
    #[error("{context}: {source}")]
    Io {
        /// The sub-stream being written
        context: String,
        /// The underlying failure
        source:  io::Error,
    },
    /// Bytes that do not decode as an RPM lead
    #[error("invalid rpm lead: {0}")]
    InvalidLead(String),
    /// A config file or package definition that cannot be used
    #[error("config: {0}")]
    Config(String),
    /// An external command exited unsuccessfully
    #[error("error running {command:?}: {status}")]
    Command {
        /// The command line as written in the config
        command: String,
        /// How it exited
        status:  String,
    },
}

impl ShipError {
    /// Returns a closure wrapping an `io::Error` with the sub-stream it occurred in
    pub(crate) fn io<C: Into<String>>(context: C) -> impl FnOnce(io::Error) -> ShipError {
        let context = context.into();
        move |source| ShipError::Io { context, source }
    }
}
