//! Command-line errors, one per exit code.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Bad flags, configuration or request files; nothing was resolved.
    #[display("invalid invocation: {_0}")]
    Usage(#[error(not(source))] String),
    /// Every tree failed to resolve, so nothing was uploaded.
    #[display("no tree could be isolated")]
    NothingIsolated,
    /// The trees resolved but their upload failed.
    #[display("upload failed")]
    Upload,
}

impl ErrorKind {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) | Self::NothingIsolated => 1,
            Self::Upload => 2,
        }
    }
}
