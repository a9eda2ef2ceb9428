//! Archiving of isolated trees.
//!
//! Each tree goes through the same stages:
//!
//! 1. [`resolve`]: expand the manifest, list the files and hash them,
//!    reusing the saved state of the previous run.
//! 2. [`produce`]: stream the files of the resolved tree, its `.isolated`
//!    document first.
//! 3. [`select`]: merge the streams of every tree and drop duplicate paths.
//! 4. upload the selection through an [`isolate_storage::Storage`].
//!
//! [`batch::archive`] runs all of it for a set of trees; a tree that fails to
//! resolve doesn't stop the others.

pub mod batch;
pub mod error;
pub mod options;
pub mod parser;
pub mod produce;
pub mod request;
pub mod resolve;
pub mod select;

pub use crate::batch::{Archived, Tree, archive, prepare_for_archival};
pub use crate::options::ArchiveOptions;
pub use crate::parser::{HelperProcess, ManifestParser, ParserHandle};
pub use crate::request::{BatchRequest, GEN_JSON_VERSION};

/// Number of files hashed at once per tree.
pub const DEFAULT_HASH_CONCURRENCY: usize = 16;
/// Slots in each producer's channel.
pub const DEFAULT_FAN_IN_BUFFER: usize = 10;

/// What every stage needs besides its inputs.
#[derive(Clone)]
pub struct Context {
    pub parser: ParserHandle,
    pub hash_concurrency: usize,
    pub fan_in_buffer: usize,
}

impl Context {
    pub fn new(parser: ParserHandle) -> Self {
        Self {
            parser,
            hash_concurrency: DEFAULT_HASH_CONCURRENCY,
            fan_in_buffer: DEFAULT_FAN_IN_BUFFER,
        }
    }

    pub fn with_hash_concurrency(mut self, concurrency: usize) -> Self {
        self.hash_concurrency = concurrency.max(1);
        self
    }

    pub fn with_fan_in_buffer(mut self, buffer: usize) -> Self {
        self.fan_in_buffer = buffer;
        self
    }
}
