use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::Arc;

use oci_spec::image::{Descriptor, DescriptorBuilder, MediaType};
use sha2::{Digest as _, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

use backend_driver::{is_manifest, BackendError, BackendErrorKind, BlobReader, DestRepo};

const BACKEND: &str = "memory";

#[derive(Debug, Default)]
struct State {
    /// Manifest bytes keyed by digest.
    manifests: HashMap<String, Vec<u8>>,
    /// Blob bytes keyed by digest.
    blobs: HashMap<String, Vec<u8>>,
    /// Tag to manifest digest. Ordered so tag listings are deterministic.
    tags: BTreeMap<String, String>,
}

/// A destination repository held entirely in memory.
///
/// Clones share state, so a test factory can hand the same repository to
/// every request. Content is digest-verified on push, matching what a real
/// registry would enforce.
#[derive(Debug, Default, Clone)]
pub struct MemoryRegistry {
    state: Arc<RwLock<State>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The manifest digest a tag currently points at, for assertions.
    pub async fn tagged_digest(&self, tag: &str) -> Option<String> {
        self.state.read().await.tags.get(tag).cloned()
    }

    /// Number of stored manifests, for assertions.
    pub async fn manifest_count(&self) -> usize {
        self.state.read().await.manifests.len()
    }

    /// Whether the registry holds no content at all.
    pub async fn is_empty(&self) -> bool {
        let state = self.state.read().await;
        state.manifests.is_empty() && state.blobs.is_empty() && state.tags.is_empty()
    }
}

fn manifest_descriptor(digest: &str, size: u64) -> Result<Descriptor, BackendError> {
    let digest = digest
        .parse::<oci_spec::image::Digest>()
        .map_err(|err| BackendError::wrap(BACKEND, BackendErrorKind::InvalidRequest, err))?;
    DescriptorBuilder::default()
        .media_type(MediaType::ImageManifest)
        .digest(digest)
        .size(size)
        .build()
        .map_err(|err| BackendError::wrap(BACKEND, BackendErrorKind::Other, err))
}

fn not_found(reference: &str, what: &str) -> BackendError {
    BackendError::new(BACKEND, BackendErrorKind::NotFound)
        .with_reference(reference)
        .with_context(what.to_string())
}

#[async_trait::async_trait]
impl DestRepo for MemoryRegistry {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn resolve(&self, tag: &str) -> Result<Descriptor, BackendError> {
        let state = self.state.read().await;
        let digest = state.tags.get(tag).ok_or_else(|| not_found(tag, "tag"))?;
        let bytes = state
            .manifests
            .get(digest)
            .ok_or_else(|| not_found(digest, "manifest"))?;
        manifest_descriptor(digest, bytes.len() as u64)
    }

    async fn fetch(&self, desc: &Descriptor) -> Result<BlobReader, BackendError> {
        let digest = desc.digest().to_string();
        let state = self.state.read().await;
        let store = if is_manifest(desc) {
            &state.manifests
        } else {
            &state.blobs
        };
        let bytes = store
            .get(&digest)
            .ok_or_else(|| not_found(&digest, "content"))?;
        Ok(Box::new(Cursor::new(bytes.clone())))
    }

    async fn push(&self, desc: &Descriptor, mut content: BlobReader) -> Result<(), BackendError> {
        let mut bytes = Vec::new();
        content
            .read_to_end(&mut bytes)
            .await
            .map_err(|err| BackendError::wrap(BACKEND, BackendErrorKind::Io, err))?;

        let computed = format!("sha256:{}", hex::encode(Sha256::digest(&bytes)));
        let expected = desc.digest().to_string();
        if computed != expected {
            return Err(BackendError::new(BACKEND, BackendErrorKind::InvalidRequest)
                .with_reference(expected)
                .with_context(format!("content digest is {computed}")));
        }

        let mut state = self.state.write().await;
        let store = if is_manifest(desc) {
            &mut state.manifests
        } else {
            &mut state.blobs
        };
        store.insert(computed, bytes);
        Ok(())
    }

    async fn tag(&self, desc: &Descriptor, tag: &str) -> Result<(), BackendError> {
        let digest = desc.digest().to_string();
        let mut state = self.state.write().await;
        if !state.manifests.contains_key(&digest) {
            return Err(not_found(&digest, "manifest"));
        }
        state.tags.insert(tag.to_string(), digest);
        Ok(())
    }

    async fn list_tags(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.state.read().await.tags.keys().cloned().collect())
    }

    async fn delete(&self, desc: &Descriptor) -> Result<(), BackendError> {
        let digest = desc.digest().to_string();
        let mut state = self.state.write().await;
        if is_manifest(desc) {
            if state.manifests.remove(&digest).is_none() {
                return Err(not_found(&digest, "manifest"));
            }
            // Every tag pointing at the digest goes with it.
            state.tags.retain(|_, d| *d != digest);
        } else if state.blobs.remove(&digest).is_none() {
            return Err(not_found(&digest, "blob"));
        }
        Ok(())
    }
}
