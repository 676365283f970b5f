//! File identities exchanged with protocol frontends.

use oci_spec::image::Descriptor;

/// Layer annotation carrying the user-visible filename; the primary key
/// for a layer within its manifest.
pub const FILE_TITLE_ANNOTATION: &str = "ocifactory.file.title";

/// Standard OCI image title annotation, set to the same filename.
pub const IMAGE_TITLE_ANNOTATION: &str = "org.opencontainers.image.title";

/// Tag prefix that keeps reference aliases disjoint from canonical
/// version tags.
pub const REF_TAG_PREFIX: &str = "ref_";

/// Artifact type stamped on packed manifests unless the facade is
/// configured otherwise.
pub const DEFAULT_ARTIFACT_TYPE: &str = "application/vnd.ocifactory.generic";

/// A file in an OCI-backed repository, as the caller addresses it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoFile {
    /// Repository that owns the file, relative to the registry base path.
    pub owning_repo: String,

    /// Canonical tag that owns the file, usually the package version.
    pub owning_tag: String,

    /// Reference alias used to look the file up. May be empty.
    pub ref_tag: String,

    /// File name.
    pub name: String,

    /// Media type. Inferred from the file name when empty.
    pub media_type: String,

    /// Expected digest. When non-empty it is cross-checked against the
    /// computed or retrieved digest before anything else happens.
    pub digest: String,
}

/// Descriptors for a stored file and the manifest that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct FileDescriptor {
    pub manifest: Descriptor,
    pub file: Descriptor,
}
