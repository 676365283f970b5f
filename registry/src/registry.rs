//! The registry facade: maps file operations onto OCI manifests, layers,
//! and tags.

use std::fmt;
use std::sync::Arc;

use camino::Utf8PathBuf;
use oci_spec::image::Descriptor;
use tokio::io::AsyncReadExt;
use url::Url;

use backend::RemoteRepo;
use backend_driver::{BackendError, BlobReader, DestRepo, Reader};
use cred::Cred;

use crate::error::{RegistryError, RegistryResult};
use crate::file::{FileDescriptor, RepoFile, DEFAULT_ARTIFACT_TYPE, REF_TAG_PREFIX};
use crate::landing::LandedFile;
use crate::layers::{
    empty_config_descriptor, file_title, pack_manifest, parse_manifest, upsert_layer,
    EMPTY_CONFIG_BLOB,
};

/// Constructor for destination repository handles.
///
/// The facade owns the factory as a value; it is the single swap point
/// tests use to substitute the in-memory stub for the remote client. Only
/// `owning_repo` of the file is required.
pub type BackendFactory =
    Arc<dyn Fn(&Cred, &RepoFile) -> Result<Arc<dyn DestRepo>, BackendError> + Send + Sync>;

/// Maps package files onto OCI artifacts held in a backing registry.
///
/// The facade holds no mutable state: configuration is captured at
/// construction, and every operation builds its own backend handle from
/// the request's credentials. Concurrent writers to the same tag are not
/// serialized here: the last manifest push wins, and single-writer-per-tag
/// is the caller's responsibility (protocol frontends satisfy it
/// per-version).
#[derive(Clone)]
pub struct Registry {
    landing_dir: Utf8PathBuf,
    artifact_type: String,
    backend: BackendFactory,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("landing_dir", &self.landing_dir)
            .field("artifact_type", &self.artifact_type)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Registry`].
pub struct RegistryBuilder {
    base_url: Url,
    landing_dir: Option<Utf8PathBuf>,
    artifact_type: Option<String>,
    backend: Option<BackendFactory>,
}

impl Registry {
    /// Start building a registry backed by the OCI endpoint at `base_url`
    /// (scheme, host, and an optional path prefix shared by every
    /// repository).
    pub fn builder(base_url: Url) -> RegistryBuilder {
        RegistryBuilder {
            base_url,
            landing_dir: None,
            artifact_type: None,
            backend: None,
        }
    }
}

impl RegistryBuilder {
    /// Directory where incoming files are landed before upload. Must
    /// already exist. Defaults to the OS temp directory.
    pub fn landing_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.landing_dir = Some(dir.into());
        self
    }

    /// Artifact type stamped on packed manifests. Protocol frontends set
    /// their specialization here.
    pub fn artifact_type(mut self, artifact_type: impl Into<String>) -> Self {
        self.artifact_type = Some(artifact_type.into());
        self
    }

    /// Replace the backend factory. Tests use this to run against the
    /// in-memory stub.
    pub fn backend(mut self, factory: BackendFactory) -> Self {
        self.backend = Some(factory);
        self
    }

    pub fn build(self) -> RegistryResult<Registry> {
        if !matches!(self.base_url.scheme(), "http" | "https")
            || self.base_url.host_str().is_none()
        {
            return Err(RegistryError::Config(format!(
                "base URL {} is not an http(s) endpoint",
                self.base_url
            )));
        }

        let landing_dir = match self.landing_dir {
            Some(dir) => dir,
            None => Utf8PathBuf::from_path_buf(std::env::temp_dir()).map_err(|dir| {
                RegistryError::Config(format!("temp dir {} is not UTF-8", dir.display()))
            })?,
        };
        if !landing_dir.is_dir() {
            return Err(RegistryError::Config(format!(
                "landing dir {landing_dir} does not exist"
            )));
        }

        let backend = self.backend.unwrap_or_else(|| {
            let base = self.base_url.clone();
            Arc::new(move |cred: &Cred, file: &RepoFile| {
                RemoteRepo::connect(&base, &file.owning_repo, cred)
                    .map(|repo| Arc::new(repo) as Arc<dyn DestRepo>)
            })
        });

        Ok(Registry {
            landing_dir,
            artifact_type: self
                .artifact_type
                .unwrap_or_else(|| DEFAULT_ARTIFACT_TYPE.to_string()),
            backend,
        })
    }
}

impl Registry {
    /// Add a file to the repository under its canonical tag.
    ///
    /// The content is landed in the scratch directory, digested, and
    /// upserted into the tag's manifest. When the file is already present
    /// with the same digest, nothing is pushed and the prior descriptors
    /// come back unchanged. Blobs reach the backend before the manifest
    /// that references them; the manifest push is the commit point.
    #[tracing::instrument(skip(self, cred, content), fields(repo = %file.owning_repo, tag = %file.owning_tag, name = %file.name))]
    pub async fn add_file(
        &self,
        cred: &Cred,
        file: &RepoFile,
        content: &mut Reader<'_>,
    ) -> RegistryResult<FileDescriptor> {
        if file.owning_tag.starts_with(REF_TAG_PREFIX) {
            return Err(RegistryError::InvalidArgument(format!(
                "canonical tag cannot be prefixed with {REF_TAG_PREFIX}; got {:?}",
                file.owning_tag
            )));
        }

        let landed = LandedFile::create(&self.landing_dir, file, content).await?;

        let backend = (self.backend)(cred, file)?;
        let existing = match backend.resolve(&file.owning_tag).await {
            Ok(desc) => Some(desc),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };

        let layers = self
            .manifest_layers(backend.as_ref(), existing.as_ref())
            .await?;
        let (updated, layers) = upsert_layer(layers, landed.descriptor());
        if !updated {
            tracing::debug!("file unchanged, skipping manifest update");
            let manifest = existing.expect("an unchanged layer implies an existing manifest");
            return Ok(FileDescriptor {
                manifest,
                file: landed.descriptor().clone(),
            });
        }

        let (manifest_bytes, manifest_desc) = pack_manifest(&self.artifact_type, layers)?;

        backend.push(landed.descriptor(), landed.reader()?).await?;
        let config = empty_config_descriptor()?;
        backend.push(&config, Box::new(EMPTY_CONFIG_BLOB)).await?;
        backend
            .push(&manifest_desc, Box::new(std::io::Cursor::new(manifest_bytes)))
            .await?;
        backend.tag(&manifest_desc, &file.owning_tag).await?;

        Ok(FileDescriptor {
            manifest: manifest_desc,
            file: landed.descriptor().clone(),
        })
    }

    /// Read a file's descriptors and content.
    ///
    /// The manifest is looked up by `owning_tag` when set, otherwise by the
    /// `ref_`-prefixed `ref_tag`. When the file carries an expected digest,
    /// a disagreement with the stored layer fails before any content is
    /// fetched.
    #[tracing::instrument(skip(self, cred), fields(repo = %file.owning_repo, name = %file.name))]
    pub async fn read_file(
        &self,
        cred: &Cred,
        file: &RepoFile,
    ) -> RegistryResult<(FileDescriptor, BlobReader)> {
        if file.owning_tag.is_empty() && file.ref_tag.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "either owning_tag or ref_tag must be set".to_string(),
            ));
        }
        let tag = if file.owning_tag.is_empty() {
            format!("{REF_TAG_PREFIX}{}", file.ref_tag)
        } else {
            file.owning_tag.clone()
        };

        let backend = (self.backend)(cred, file)?;
        let manifest_desc = backend.resolve(&tag).await?;
        let layers = self
            .manifest_layers(backend.as_ref(), Some(&manifest_desc))
            .await?;

        for layer in layers {
            if file_title(&layer) != Some(file.name.as_str()) {
                continue;
            }
            if !file.digest.is_empty() && layer.digest().to_string() != file.digest {
                return Err(RegistryError::DigestMismatch {
                    expected: file.digest.clone(),
                    actual: layer.digest().to_string(),
                });
            }
            let content = backend.fetch(&layer).await?;
            return Ok((
                FileDescriptor {
                    manifest: manifest_desc,
                    file: layer,
                },
                content,
            ));
        }

        Err(RegistryError::NotFound(format!(
            "file {:?} in tag {tag:?}",
            file.name
        )))
    }

    /// List the canonical tags of a repository. `ref_` aliases are
    /// excluded; ordering is whatever the backend returns.
    #[tracing::instrument(skip(self, cred))]
    pub async fn list_tags(&self, cred: &Cred, repo: &str) -> RegistryResult<Vec<String>> {
        let backend = self.backend_for(cred, repo)?;
        self.canonical_tags(backend.as_ref()).await
    }

    /// List every file across a repository's canonical tags.
    ///
    /// Layers without a filename annotation are skipped; they are not an
    /// error.
    #[tracing::instrument(skip(self, cred))]
    pub async fn list_files(&self, cred: &Cred, repo: &str) -> RegistryResult<Vec<RepoFile>> {
        let backend = self.backend_for(cred, repo)?;

        let mut files = Vec::new();
        for tag in self.canonical_tags(backend.as_ref()).await? {
            let manifest_desc = backend.resolve(&tag).await?;
            let layers = self
                .manifest_layers(backend.as_ref(), Some(&manifest_desc))
                .await?;
            for layer in layers {
                if let Some(name) = file_title(&layer) {
                    files.push(RepoFile {
                        name: name.to_string(),
                        owning_repo: repo.to_string(),
                        owning_tag: tag.clone(),
                        digest: layer.digest().to_string(),
                        ..Default::default()
                    });
                }
            }
        }
        Ok(files)
    }

    /// Attach reference aliases to the manifest a canonical tag points at.
    ///
    /// Refs are applied in order; the first failure aborts, and tags
    /// already applied stay in place.
    #[tracing::instrument(skip(self, cred))]
    pub async fn append_refs(
        &self,
        cred: &Cred,
        repo: &str,
        canonical_tag: &str,
        refs: &[&str],
    ) -> RegistryResult<()> {
        let backend = self.backend_for(cred, repo)?;
        let manifest_desc = backend.resolve(canonical_tag).await?;
        for alias in refs {
            backend
                .tag(&manifest_desc, &format!("{REF_TAG_PREFIX}{alias}"))
                .await?;
        }
        Ok(())
    }

    /// Delete the manifest a tag points at.
    ///
    /// Backing blobs are not deleted; reclaiming them is the backend
    /// garbage collector's job.
    #[tracing::instrument(skip(self, cred))]
    pub async fn delete_tag_files(
        &self,
        cred: &Cred,
        repo: &str,
        tag: &str,
    ) -> RegistryResult<()> {
        let backend = self.backend_for(cred, repo)?;
        self.delete_tag(backend.as_ref(), tag).await
    }

    /// Delete every canonical tag's manifest in a repository.
    ///
    /// Refs are skipped so a manifest is not deleted twice through its
    /// aliases.
    #[tracing::instrument(skip(self, cred))]
    pub async fn delete_repo_files(&self, cred: &Cred, repo: &str) -> RegistryResult<()> {
        let backend = self.backend_for(cred, repo)?;
        for tag in self.canonical_tags(backend.as_ref()).await? {
            self.delete_tag(backend.as_ref(), &tag).await?;
        }
        Ok(())
    }

    fn backend_for(&self, cred: &Cred, repo: &str) -> RegistryResult<Arc<dyn DestRepo>> {
        let file = RepoFile {
            owning_repo: repo.to_string(),
            ..Default::default()
        };
        Ok((self.backend)(cred, &file)?)
    }

    async fn canonical_tags(&self, backend: &dyn DestRepo) -> RegistryResult<Vec<String>> {
        let tags = backend.list_tags().await?;
        Ok(tags
            .into_iter()
            .filter(|tag| !tag.starts_with(REF_TAG_PREFIX))
            .collect())
    }

    async fn delete_tag(&self, backend: &dyn DestRepo, tag: &str) -> RegistryResult<()> {
        let manifest_desc = backend.resolve(tag).await?;
        backend.delete(&manifest_desc).await?;
        Ok(())
    }

    async fn manifest_layers(
        &self,
        backend: &dyn DestRepo,
        manifest_desc: Option<&Descriptor>,
    ) -> RegistryResult<Vec<Descriptor>> {
        let Some(desc) = manifest_desc else {
            return Ok(Vec::new());
        };
        let mut reader = backend.fetch(desc).await?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await?;
        Ok(parse_manifest(&bytes)?.layers().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://registry.example.com").unwrap()
    }

    #[test]
    fn builder_defaults() {
        let registry = Registry::builder(base()).build().unwrap();
        assert_eq!(registry.artifact_type, DEFAULT_ARTIFACT_TYPE);
        assert_eq!(
            registry.landing_dir.as_std_path(),
            std::env::temp_dir().as_path()
        );
    }

    #[test]
    fn builder_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::builder(base())
            .landing_dir(dir.path().to_str().unwrap())
            .artifact_type("application/custom")
            .build()
            .unwrap();
        assert_eq!(registry.artifact_type, "application/custom");
        assert_eq!(registry.landing_dir.as_std_path(), dir.path());
    }

    #[test]
    fn builder_rejects_missing_landing_dir() {
        let err = Registry::builder(base())
            .landing_dir("/does/not/exist")
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::Config(_)));
    }

    #[test]
    fn builder_rejects_non_http_base() {
        let err = Registry::builder(Url::parse("ftp://registry.example.com").unwrap())
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::Config(_)));
    }
}
