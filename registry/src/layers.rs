//! Manifest packing and the filename-keyed layer upsert.

use oci_spec::image::{
    Descriptor, DescriptorBuilder, ImageManifest, ImageManifestBuilder, MediaType,
};
use sha2::{Digest as _, Sha256};

use crate::error::{RegistryError, RegistryResult};
use crate::file::FILE_TITLE_ANNOTATION;

/// Content of the empty config blob packed into every artifact manifest.
pub(crate) const EMPTY_CONFIG_BLOB: &[u8] = b"{}";

/// The filename a layer is keyed by, if it carries one.
pub(crate) fn file_title(desc: &Descriptor) -> Option<&str> {
    desc.annotations()
        .as_ref()
        .and_then(|annotations| annotations.get(FILE_TITLE_ANNOTATION))
        .map(String::as_str)
        .filter(|title| !title.is_empty())
}

/// Upsert `file_desc` into `layers`, keyed by the filename annotation.
///
/// Returns `false` when a layer with the same filename and digest is
/// already present; the caller skips the repack and push entirely in that
/// case. A replacement keeps the original layer position, so layer order
/// is append-stable.
pub(crate) fn upsert_layer(
    mut layers: Vec<Descriptor>,
    file_desc: &Descriptor,
) -> (bool, Vec<Descriptor>) {
    let name = file_title(file_desc);
    let existing = layers
        .iter()
        .position(|layer| name.is_some() && file_title(layer) == name);
    match existing {
        Some(idx) if layers[idx].digest() == file_desc.digest() => (false, layers),
        Some(idx) => {
            layers[idx] = file_desc.clone();
            (true, layers)
        }
        None => {
            layers.push(file_desc.clone());
            (true, layers)
        }
    }
}

/// Decode manifest bytes fetched from the backend.
pub(crate) fn parse_manifest(bytes: &[u8]) -> RegistryResult<ImageManifest> {
    Ok(ImageManifest::from_reader(bytes)?)
}

fn sha256_of(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

fn parse_digest(digest: &str) -> RegistryResult<oci_spec::image::Digest> {
    digest
        .parse::<oci_spec::image::Digest>()
        .map_err(|err| RegistryError::InvalidDigest(err.to_string()))
}

/// Descriptor of the empty config blob referenced by packed manifests.
pub(crate) fn empty_config_descriptor() -> RegistryResult<Descriptor> {
    Ok(DescriptorBuilder::default()
        .media_type(MediaType::EmptyJSON)
        .digest(parse_digest(&sha256_of(EMPTY_CONFIG_BLOB))?)
        .size(EMPTY_CONFIG_BLOB.len() as u64)
        .build()?)
}

/// Pack layers into an image-spec v1.1 artifact manifest.
///
/// Returns the serialized manifest bytes and their descriptor.
pub(crate) fn pack_manifest(
    artifact_type: &str,
    layers: Vec<Descriptor>,
) -> RegistryResult<(Vec<u8>, Descriptor)> {
    let manifest = ImageManifestBuilder::default()
        .schema_version(2u32)
        .media_type(MediaType::ImageManifest)
        .artifact_type(MediaType::Other(artifact_type.to_string()))
        .config(empty_config_descriptor()?)
        .layers(layers)
        .build()?;

    let mut bytes = Vec::new();
    manifest.to_writer(&mut bytes)?;

    let descriptor = DescriptorBuilder::default()
        .media_type(MediaType::ImageManifest)
        .digest(parse_digest(&sha256_of(&bytes))?)
        .size(bytes.len() as u64)
        .build()?;
    Ok((bytes, descriptor))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn layer(name: &str, digest: &str, size: u64) -> Descriptor {
        let mut annotations = HashMap::new();
        annotations.insert(FILE_TITLE_ANNOTATION.to_string(), name.to_string());
        DescriptorBuilder::default()
            .media_type(MediaType::Other("text/plain".to_string()))
            .digest(digest.parse::<oci_spec::image::Digest>().unwrap())
            .size(size)
            .annotations(annotations)
            .build()
            .unwrap()
    }

    fn digest(fill: &str) -> String {
        format!("sha256:{}", fill.repeat(64 / fill.len()))
    }

    #[test]
    fn adds_a_new_file() {
        let new = layer("test.txt", &digest("1"), 100);
        let (updated, layers) = upsert_layer(Vec::new(), &new);
        assert!(updated);
        assert_eq!(layers, vec![new]);
    }

    #[test]
    fn replaces_on_digest_change_keeping_position() {
        let first = layer("a.txt", &digest("1"), 100);
        let second = layer("b.txt", &digest("2"), 50);
        let replacement = layer("a.txt", &digest("3"), 200);

        let (updated, layers) = upsert_layer(vec![first, second.clone()], &replacement);
        assert!(updated);
        assert_eq!(layers, vec![replacement, second]);
    }

    #[test]
    fn no_update_for_same_digest() {
        let existing = layer("test.txt", &digest("1"), 100);
        let rewrite = layer("test.txt", &digest("1"), 100);

        let (updated, layers) = upsert_layer(vec![existing.clone()], &rewrite);
        assert!(!updated);
        assert_eq!(layers, vec![existing]);
    }

    #[test]
    fn packed_manifest_parses_back() {
        let layers = vec![
            layer("a.txt", &digest("1"), 100),
            layer("b.txt", &digest("2"), 50),
        ];
        let (bytes, desc) = pack_manifest("application/vnd.ocifactory.generic", layers).unwrap();

        assert_eq!(desc.media_type(), &MediaType::ImageManifest);
        assert_eq!(desc.size(), bytes.len() as u64);

        let manifest = parse_manifest(&bytes).unwrap();
        assert_eq!(manifest.layers().len(), 2);
        assert_eq!(file_title(&manifest.layers()[0]), Some("a.txt"));
        assert_eq!(file_title(&manifest.layers()[1]), Some("b.txt"));
        assert_eq!(manifest.config().media_type(), &MediaType::EmptyJSON);
    }

    #[test]
    fn empty_config_is_the_canonical_empty_json() {
        let desc = empty_config_descriptor().unwrap();
        assert_eq!(desc.size(), 2);
        assert_eq!(
            desc.digest().to_string(),
            "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn unannotated_layers_never_match() {
        let unannotated = DescriptorBuilder::default()
            .media_type(MediaType::Other("text/plain".to_string()))
            .digest(digest("4").parse::<oci_spec::image::Digest>().unwrap())
            .size(1u64)
            .build()
            .unwrap();
        let new = layer("test.txt", &digest("5"), 10);

        let (updated, layers) = upsert_layer(vec![unannotated.clone()], &new);
        assert!(updated);
        assert_eq!(layers, vec![unannotated, new]);
    }
}
