//! Content-addressed stores, and the uploader that ships local files to them.

pub mod backend;
mod codec;
mod digest;
pub mod error;
mod item;
mod upload;

#[cfg(any(test, feature = "mock"))]
pub use crate::backend::{MockCall, MockStore};
pub use crate::backend::{DryRunStore, LocalStore, Store, StoreHandle, open};
pub use crate::digest::{of as digest_of, validate as validate_digest};
pub use crate::item::{COMPRESSION_LEVEL, Destination, FileToUpload, UploadItem};
pub use crate::upload::{Storage, UploadStats};
