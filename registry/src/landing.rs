//! Landing zone: incoming streams are persisted to scratch files before
//! digest computation and backend push.
//!
//! Landing to disk keeps multi-gigabyte uploads out of the heap and makes
//! the digest precondition check deterministic before anything touches the
//! backend.

use std::collections::HashMap;

use camino::Utf8Path;
use oci_spec::image::{Descriptor, DescriptorBuilder, MediaType};
use sha2::{Digest as _, Sha256};
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};

use backend_driver::{BlobReader, Reader};

use crate::error::{RegistryError, RegistryResult};
use crate::file::{RepoFile, FILE_TITLE_ANNOTATION, IMAGE_TITLE_ANNOTATION};
use crate::media::detect_media_type;

const SCRATCH_PREFIX: &str = "oci-upload-";

/// A file landed in the scratch directory, with its computed descriptor.
///
/// The scratch file is removed when this value is dropped, whichever way
/// the surrounding operation exits, including cancellation.
pub(crate) struct LandedFile {
    scratch: NamedTempFile,
    descriptor: Descriptor,
}

impl LandedFile {
    /// Copy `content` through a fresh scratch file in `dir`, computing
    /// size and SHA-256 as a side effect of the copy.
    ///
    /// When the file carries an expected digest, a disagreement fails here,
    /// before any backend mutation.
    pub(crate) async fn create(
        dir: &Utf8Path,
        file: &RepoFile,
        content: &mut Reader<'_>,
    ) -> RegistryResult<Self> {
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempfile_in(dir)?;
        let mut out = BufWriter::new(File::from_std(scratch.reopen()?));

        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = content.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            out.write_all(&buf[..n]).await?;
            size += n as u64;
        }
        out.flush().await?;

        let digest = format!("sha256:{}", hex::encode(hasher.finalize()));
        if !file.digest.is_empty() && file.digest != digest {
            return Err(RegistryError::DigestMismatch {
                expected: file.digest.clone(),
                actual: digest,
            });
        }

        let mut annotations = HashMap::new();
        annotations.insert(FILE_TITLE_ANNOTATION.to_string(), file.name.clone());
        annotations.insert(IMAGE_TITLE_ANNOTATION.to_string(), file.name.clone());

        let descriptor = DescriptorBuilder::default()
            .media_type(MediaType::Other(detect_media_type(file)))
            .digest(
                digest
                    .parse::<oci_spec::image::Digest>()
                    .map_err(|err| RegistryError::InvalidDigest(err.to_string()))?,
            )
            .size(size)
            .annotations(annotations)
            .build()?;

        Ok(Self { scratch, descriptor })
    }

    pub(crate) fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Reopen the landed bytes for upload.
    pub(crate) fn reader(&self) -> RegistryResult<BlobReader> {
        let file = File::from_std(self.scratch.reopen()?);
        Ok(Box::new(BufReader::new(file)))
    }
}
