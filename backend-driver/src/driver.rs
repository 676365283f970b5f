use std::fmt;

use oci_spec::image::{Descriptor, MediaType};
use tokio::io;

use crate::error::BackendError;

/// An owned stream of content bytes handed across the backend boundary.
pub type BlobReader = Box<dyn io::AsyncBufRead + Unpin + Send>;

/// A borrowed reader stream for incoming file contents.
pub type Reader<'r> = dyn io::AsyncBufRead + Unpin + Send + 'r;

/// A destination repository: one OCI repository the facade reads and
/// writes on behalf of a request.
///
/// Handles are constructed per request by the backend factory and carry
/// whatever credentials that request arrived with. Implementations must be
/// value-equivalent at the level the manifest layer engine uses, so tests
/// can substitute the in-memory stub for the remote client.
#[async_trait::async_trait]
pub trait DestRepo: fmt::Debug + Send + Sync {
    /// The name of the backend, for diagnostics.
    fn name(&self) -> &'static str;

    /// Resolve a tag to the descriptor of the manifest it points at.
    async fn resolve(&self, tag: &str) -> Result<Descriptor, BackendError>;

    /// Fetch the content addressed by a descriptor as a byte stream.
    async fn fetch(&self, desc: &Descriptor) -> Result<BlobReader, BackendError>;

    /// Upload content under its digest address. Manifests and blobs are
    /// routed by the descriptor's media type.
    async fn push(&self, desc: &Descriptor, content: BlobReader) -> Result<(), BackendError>;

    /// Attach a tag to an already-pushed manifest. The tag resolves to the
    /// same digest as the descriptor afterwards.
    async fn tag(&self, desc: &Descriptor, tag: &str) -> Result<(), BackendError>;

    /// Enumerate every tag in the repository.
    async fn list_tags(&self) -> Result<Vec<String>, BackendError>;

    /// Delete the content addressed by a descriptor. Blobs referenced by a
    /// deleted manifest are left behind for the backend's own garbage
    /// collection.
    async fn delete(&self, desc: &Descriptor) -> Result<(), BackendError>;
}

/// Whether a descriptor addresses a manifest rather than a blob.
pub fn is_manifest(desc: &Descriptor) -> bool {
    match desc.media_type() {
        MediaType::ImageManifest | MediaType::ImageIndex => true,
        MediaType::Other(s) => s == "application/vnd.docker.distribution.manifest.v2+json",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_obj_safe!(DestRepo);

    #[test]
    fn manifest_media_types() {
        let manifest = oci_spec::image::DescriptorBuilder::default()
            .media_type(MediaType::ImageManifest)
            .digest(
                "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
                    .parse::<oci_spec::image::Digest>()
                    .unwrap(),
            )
            .size(2u64)
            .build()
            .unwrap();
        assert!(is_manifest(&manifest));

        let blob = oci_spec::image::DescriptorBuilder::default()
            .media_type(MediaType::Other("text/plain".to_string()))
            .digest(
                "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
                    .parse::<oci_spec::image::Digest>()
                    .unwrap(),
            )
            .size(11u64)
            .build()
            .unwrap();
        assert!(!is_manifest(&blob));
    }
}
