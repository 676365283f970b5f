//! File-extension driven media-type detection.

use crate::file::RepoFile;

/// Media type recorded for a file.
///
/// An explicit `media_type` on the file always wins. Otherwise the file
/// extension decides, falling back to `application/octet-stream`.
/// Protocol frontends keep their own, more specific tables; this one
/// covers the formats every protocol shares.
pub(crate) fn detect_media_type(file: &RepoFile) -> String {
    if !file.media_type.is_empty() {
        return file.media_type.clone();
    }

    let ext = file
        .name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or_default();
    match ext {
        "txt" => "text/plain",
        "html" => "text/html",
        "xml" => "application/xml",
        "json" => "application/json",
        "tar" => "application/x-tar",
        "gz" | "tgz" => "application/x-gzip",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
    .to_string()
}
