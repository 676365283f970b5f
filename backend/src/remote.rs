use std::time::Duration;

use bytes::Bytes;
use futures::TryStreamExt;
use http::StatusCode;
use oci_spec::image::{Descriptor, DescriptorBuilder, MediaType};
use serde::Deserialize;
use sha2::{Digest as _, Sha256};
use tokio::io::AsyncReadExt;
use tokio_util::io::{ReaderStream, StreamReader};
use url::Url;

use backend_driver::{is_manifest, BackendError, BackendErrorKind, BlobReader, DestRepo};
use cred::Cred;

const BACKEND: &str = "remote";

/// Media types offered when pulling manifests.
const MANIFEST_ACCEPT: &str =
    "application/vnd.oci.image.manifest.v1+json, application/vnd.docker.distribution.manifest.v2+json";

const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

/// Retry budget for idempotent requests.
const ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// A destination repository on a remote OCI registry, addressed through
/// the OCI Distribution HTTP API.
///
/// One handle serves one logical repository and carries the credentials of
/// the request that created it. Idempotent requests are retried with a
/// short exponential backoff; streaming uploads are sent once, since their
/// body cannot be replayed.
#[derive(Debug)]
pub struct RemoteRepo {
    http: reqwest::Client,
    /// Scheme and authority of the registry, without a trailing slash.
    origin: String,
    /// Full repository name: the base path joined with the logical repo.
    name: String,
    cred: Cred,
}

#[derive(Debug, Deserialize)]
struct TagList {
    tags: Option<Vec<String>>,
}

impl RemoteRepo {
    /// Build a handle for one logical repository.
    ///
    /// `base` carries the scheme, host, and any path prefix shared by every
    /// repository behind this registry; `repo` is the logical repository
    /// path appended to it.
    pub fn connect(base: &Url, repo: &str, cred: &Cred) -> Result<Self, BackendError> {
        if !matches!(base.scheme(), "http" | "https") || base.host_str().is_none() {
            return Err(
                BackendError::new(BACKEND, BackendErrorKind::InvalidReference)
                    .with_context(format!("base URL {base} is not an http(s) endpoint")),
            );
        }
        if repo.is_empty() || repo.split('/').any(|segment| segment.is_empty()) {
            return Err(
                BackendError::new(BACKEND, BackendErrorKind::InvalidReference)
                    .with_repo(repo)
                    .with_context("repository path has empty segments"),
            );
        }

        let prefix = base.path().trim_matches('/');
        let name = if prefix.is_empty() {
            repo.to_string()
        } else {
            format!("{prefix}/{repo}")
        };

        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| BackendError::wrap(BACKEND, BackendErrorKind::Transport, err))?;

        Ok(Self {
            http,
            origin: base.origin().ascii_serialization(),
            name,
            cred: cred.clone(),
        })
    }

    fn manifest_url(&self, reference: &str) -> String {
        format!("{}/v2/{}/manifests/{}", self.origin, self.name, reference)
    }

    fn blob_url(&self, digest: &str) -> String {
        format!("{}/v2/{}/blobs/{}", self.origin, self.name, digest)
    }

    fn upload_url(&self) -> String {
        format!("{}/v2/{}/blobs/uploads/", self.origin, self.name)
    }

    fn tags_url(&self) -> String {
        format!("{}/v2/{}/tags/list", self.origin, self.name)
    }

    fn content_url(&self, desc: &Descriptor) -> String {
        let digest = desc.digest().to_string();
        if is_manifest(desc) {
            self.manifest_url(&digest)
        } else {
            self.blob_url(&digest)
        }
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cred.basic {
            Some(basic) => req.basic_auth(&basic.user, Some(basic.password.revealed())),
            None => req,
        }
    }

    /// Send an idempotent request, retrying transport failures and server
    /// errors with backoff. Requests with one-shot bodies must not go
    /// through here.
    async fn send_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, BackendError> {
        let mut delay = RETRY_DELAY;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.authed(build()).send().await {
                Ok(res) if res.status().is_server_error() && attempt < ATTEMPTS => {
                    tracing::debug!(status = %res.status(), attempt, "retrying on server error");
                }
                Ok(res) => return Ok(res),
                Err(err) if attempt < ATTEMPTS => {
                    tracing::debug!(%err, attempt, "retrying on transport error");
                }
                Err(err) => return Err(self.transport(err)),
            }
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    fn transport(&self, err: reqwest::Error) -> BackendError {
        BackendError::wrap(BACKEND, BackendErrorKind::Transport, err).with_repo(self.name.clone())
    }

    /// Map a non-success response onto the error taxonomy.
    fn status_error(&self, status: StatusCode, what: &str) -> BackendError {
        let kind = match status {
            StatusCode::NOT_FOUND => BackendErrorKind::NotFound,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendErrorKind::Auth,
            _ => BackendErrorKind::Transport,
        };
        BackendError::new(BACKEND, kind)
            .with_status(status)
            .with_repo(self.name.clone())
            .with_context(what.to_string())
    }

    fn ensure_success(
        &self,
        res: reqwest::Response,
        what: &str,
        reference: &str,
    ) -> Result<reqwest::Response, BackendError> {
        if res.status().is_success() {
            Ok(res)
        } else {
            Err(self
                .status_error(res.status(), what)
                .with_reference(reference))
        }
    }

    /// Turn a Location header into an absolute URL. Registries are allowed
    /// to answer with a relative path.
    fn absolutize(&self, location: &str) -> Result<Url, BackendError> {
        Url::parse(location)
            .or_else(|_| Url::parse(&format!("{}{}", self.origin, location)))
            .map_err(|err| {
                BackendError::wrap(BACKEND, BackendErrorKind::Transport, err)
                    .with_context(format!("unusable Location header {location:?}"))
            })
    }

    fn location_header(&self, res: &reqwest::Response) -> Result<Url, BackendError> {
        let location = res
            .headers()
            .get(http::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                BackendError::new(BACKEND, BackendErrorKind::Transport)
                    .with_repo(self.name.clone())
                    .with_context("registry response lacks a Location header")
            })?;
        self.absolutize(location)
    }

    async fn push_manifest(
        &self,
        desc: &Descriptor,
        mut content: BlobReader,
    ) -> Result<(), BackendError> {
        let mut buf = Vec::new();
        content
            .read_to_end(&mut buf)
            .await
            .map_err(|err| BackendError::wrap(BACKEND, BackendErrorKind::Io, err))?;
        self.put_manifest_bytes(desc, &desc.digest().to_string(), Bytes::from(buf))
            .await
    }

    async fn put_manifest_bytes(
        &self,
        desc: &Descriptor,
        reference: &str,
        body: Bytes,
    ) -> Result<(), BackendError> {
        let url = self.manifest_url(reference);
        tracing::debug!(%url, "PUT manifest");
        let media_type = desc.media_type().to_string();
        let res = self
            .send_retry(|| {
                self.http
                    .put(&url)
                    .header(http::header::CONTENT_TYPE, media_type.as_str())
                    .body(body.clone())
            })
            .await?;
        self.ensure_success(res, "push manifest", reference)?;
        Ok(())
    }

    async fn push_blob(&self, desc: &Descriptor, content: BlobReader) -> Result<(), BackendError> {
        let digest = desc.digest().to_string();

        let res = self
            .send_retry(|| {
                self.http
                    .post(self.upload_url())
                    .header(http::header::CONTENT_LENGTH, "0")
            })
            .await?;
        let res = self.ensure_success(res, "start blob upload", &digest)?;

        let mut target = self.location_header(&res)?;
        target.query_pairs_mut().append_pair("digest", &digest);

        // The body streams straight off the landing file; it cannot be
        // replayed, so this request is sent exactly once.
        tracing::debug!(url = %target, "PUT blob");
        let body = reqwest::Body::wrap_stream(ReaderStream::new(content));
        let res = self
            .authed(
                self.http
                    .put(target)
                    .header(http::header::CONTENT_TYPE, "application/octet-stream")
                    .header(http::header::CONTENT_LENGTH, desc.size().to_string())
                    .body(body),
            )
            .send()
            .await
            .map_err(|err| self.transport(err))?;
        self.ensure_success(res, "complete blob upload", &digest)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DestRepo for RemoteRepo {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn resolve(&self, tag: &str) -> Result<Descriptor, BackendError> {
        let url = self.manifest_url(tag);
        tracing::trace!(%url, "resolve tag");
        let res = self
            .send_retry(|| {
                self.http
                    .get(&url)
                    .header(http::header::ACCEPT, MANIFEST_ACCEPT)
            })
            .await?;
        let res = self.ensure_success(res, "resolve manifest", tag)?;

        let media_type = res
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(media_type_of)
            .unwrap_or(MediaType::ImageManifest);
        let header_digest = res
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let body = res.bytes().await.map_err(|err| self.transport(err))?;
        let digest = header_digest
            .unwrap_or_else(|| format!("sha256:{}", hex::encode(Sha256::digest(&body))));
        descriptor(media_type, &digest, body.len() as u64)
    }

    async fn fetch(&self, desc: &Descriptor) -> Result<BlobReader, BackendError> {
        let url = self.content_url(desc);
        tracing::trace!(%url, "fetch content");
        let accept_manifest = is_manifest(desc);
        let res = self
            .send_retry(|| {
                let req = self.http.get(&url);
                if accept_manifest {
                    req.header(http::header::ACCEPT, MANIFEST_ACCEPT)
                } else {
                    req
                }
            })
            .await?;
        let res = self.ensure_success(res, "fetch content", &desc.digest().to_string())?;

        let stream = res.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }

    async fn push(&self, desc: &Descriptor, content: BlobReader) -> Result<(), BackendError> {
        if is_manifest(desc) {
            self.push_manifest(desc, content).await
        } else {
            self.push_blob(desc, content).await
        }
    }

    async fn tag(&self, desc: &Descriptor, tag: &str) -> Result<(), BackendError> {
        // The distribution API has no tag primitive; re-push the
        // digest-addressed manifest bytes under the new reference. The
        // digest is content-derived, so both references resolve alike.
        let mut reader = self.fetch(desc).await?;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|err| BackendError::wrap(BACKEND, BackendErrorKind::Io, err))?;
        self.put_manifest_bytes(desc, tag, Bytes::from(buf)).await
    }

    async fn list_tags(&self) -> Result<Vec<String>, BackendError> {
        let url = self.tags_url();
        tracing::trace!(%url, "list tags");
        let res = self.send_retry(|| self.http.get(&url)).await?;
        let res = self.ensure_success(res, "list tags", &self.name)?;
        let tags: TagList = res.json().await.map_err(|err| {
            BackendError::wrap(BACKEND, BackendErrorKind::Serialization, err)
                .with_repo(self.name.clone())
        })?;
        Ok(tags.tags.unwrap_or_default())
    }

    async fn delete(&self, desc: &Descriptor) -> Result<(), BackendError> {
        let url = self.content_url(desc);
        tracing::debug!(%url, "delete content");
        let res = self.send_retry(|| self.http.delete(&url)).await?;
        self.ensure_success(res, "delete content", &desc.digest().to_string())?;
        Ok(())
    }
}

fn media_type_of(content_type: &str) -> MediaType {
    match content_type {
        "application/vnd.oci.image.manifest.v1+json" => MediaType::ImageManifest,
        "application/vnd.oci.image.index.v1+json" => MediaType::ImageIndex,
        other => MediaType::Other(other.to_string()),
    }
}

fn descriptor(media_type: MediaType, digest: &str, size: u64) -> Result<Descriptor, BackendError> {
    let digest = digest
        .parse::<oci_spec::image::Digest>()
        .map_err(|err| BackendError::wrap(BACKEND, BackendErrorKind::Serialization, err))?;
    DescriptorBuilder::default()
        .media_type(media_type)
        .digest(digest)
        .size(size)
        .build()
        .map_err(|err| BackendError::wrap(BACKEND, BackendErrorKind::Other, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RemoteRepo {
        RemoteRepo::connect(
            &Url::parse("https://registry.example.com/base").unwrap(),
            "packages/demo",
            &Cred::anonymous(),
        )
        .unwrap()
    }

    #[test]
    fn composes_repository_name_under_base_path() {
        let repo = repo();
        assert_eq!(
            repo.manifest_url("1.0.0"),
            "https://registry.example.com/v2/base/packages/demo/manifests/1.0.0"
        );
        assert_eq!(
            repo.blob_url("sha256:abc"),
            "https://registry.example.com/v2/base/packages/demo/blobs/sha256:abc"
        );
        assert_eq!(
            repo.tags_url(),
            "https://registry.example.com/v2/base/packages/demo/tags/list"
        );
    }

    #[test]
    fn base_without_path_uses_repo_alone() {
        let repo = RemoteRepo::connect(
            &Url::parse("http://localhost:5000").unwrap(),
            "demo",
            &Cred::anonymous(),
        )
        .unwrap();
        assert_eq!(
            repo.upload_url(),
            "http://localhost:5000/v2/demo/blobs/uploads/"
        );
    }

    #[test]
    fn rejects_malformed_repository_paths() {
        let base = Url::parse("https://registry.example.com").unwrap();
        for repo in ["", "/leading", "trailing/", "dou//ble"] {
            let err = RemoteRepo::connect(&base, repo, &Cred::anonymous()).unwrap_err();
            assert_eq!(err.kind(), BackendErrorKind::InvalidReference, "{repo:?}");
        }
    }

    #[test]
    fn rejects_non_http_base() {
        let base = Url::parse("file:///srv/registry").unwrap();
        let err = RemoteRepo::connect(&base, "demo", &Cred::anonymous()).unwrap_err();
        assert_eq!(err.kind(), BackendErrorKind::InvalidReference);
    }

    #[test]
    fn absolutizes_relative_location() {
        let repo = repo();
        let url = repo.absolutize("/v2/demo/blobs/uploads/uuid-1").unwrap();
        assert_eq!(
            url.as_str(),
            "https://registry.example.com/v2/demo/blobs/uploads/uuid-1"
        );

        let absolute = repo
            .absolutize("https://cdn.example.com/upload/uuid-2")
            .unwrap();
        assert_eq!(absolute.as_str(), "https://cdn.example.com/upload/uuid-2");
    }
}
