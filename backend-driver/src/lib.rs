//! Contract between the registry facade and a destination repository.
//!
//! This crate defines the capability set a destination repository must
//! offer (resolve, fetch, push, tag, list-tags, delete) together with the
//! error type backends report. The facade cannot tell a remote registry
//! from the in-memory stub through this interface.

mod driver;
mod error;

pub use driver::is_manifest;
pub use driver::BlobReader;
pub use driver::DestRepo;
pub use driver::Reader;
pub use error::BackendError;
pub use error::BackendErrorKind;
