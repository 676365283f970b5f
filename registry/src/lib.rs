//! # OCI artifact file registry
//!
//! This crate maps package files onto OCI artifacts held in a backing
//! registry. Each package version is one manifest under its version tag;
//! each file in the version is one layer, keyed by a filename annotation.
//! Reference aliases (npm dist-tags, Maven `latest`) live in the same tag
//! namespace under a `ref_` prefix so canonical versions can be enumerated
//! without double counting.
//!
//! ## Features
//!
//! - Streamed uploads through a scratch landing zone (no heap retention)
//! - Idempotent writes: re-adding identical content pushes nothing
//! - Per-file addressability inside a shared version manifest
//! - Pluggable destination backend; tests run against an in-memory stub
//! - Error classification without string matching
//!
//! ## Example
//!
//! ```no_run
//! use cred::Cred;
//! use registry::{Registry, RepoFile};
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::builder(Url::parse("https://registry.example.com")?).build()?;
//!
//! let file = RepoFile {
//!     owning_repo: "packages/demo".into(),
//!     owning_tag: "1.0.0".into(),
//!     name: "demo-1.0.0.tar.gz".into(),
//!     ..Default::default()
//! };
//! let mut content = &b"demo bytes"[..];
//! let desc = registry
//!     .add_file(&Cred::anonymous(), &file, &mut content)
//!     .await?;
//! println!("stored as {}", desc.file.digest());
//! # Ok(())
//! # }
//! ```

mod error;
mod file;
mod landing;
mod layers;
mod media;
mod registry;

pub use backend_driver::{BackendError, BackendErrorKind, BlobReader, DestRepo, Reader};

pub use error::{has_status, is_not_found, RegistryError, RegistryResult};
pub use file::{
    FileDescriptor, RepoFile, DEFAULT_ARTIFACT_TYPE, FILE_TITLE_ANNOTATION,
    IMAGE_TITLE_ANNOTATION, REF_TAG_PREFIX,
};
pub use registry::{BackendFactory, Registry, RegistryBuilder};
