// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Streaming downloader.

use std::path::{Path, PathBuf};

use anyhow::Result;
use futures_util::StreamExt;
use reqwest::Url;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use super::types::{ByteBuffer, DownloadProgress};
use crate::error::LoadError;

/// Read size for local files.
const FILE_READ_CHUNK: usize = 64 * 1024;

/// Fetches model bytes over HTTP(S) or from local paths, one segment at a
/// time, reporting progress after every segment.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }

    /// Download `url` into a [`ByteBuffer`].
    ///
    /// `on_progress` runs once per received segment. When `token` fires the
    /// read loop exits at the next iteration, dropping the response stream,
    /// and the call returns [`LoadError::Cancelled`].
    pub async fn download<F>(
        &self,
        url: &str,
        token: &CancellationToken,
        mut on_progress: F,
    ) -> Result<ByteBuffer, LoadError>
    where
        F: FnMut(&DownloadProgress),
    {
        if let Some(path) = local_path(url) {
            return self.read_file(url, &path, token, on_progress).await;
        }

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(LoadError::Cancelled),
            r = self.client.get(url).send() => r.map_err(|e| describe(url, e))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::network(url, Some(status.as_u16()), format!("HTTP {}", status)));
        }

        let mut buffer = ByteBuffer::new(response.content_length());
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(url, loaded = buffer.loaded(), "Download cancelled, releasing stream");
                    return Err(LoadError::Cancelled);
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(segment)) => {
                    buffer.append(segment.to_vec());
                    on_progress(&buffer.progress());
                }
                Some(Err(e)) => return Err(describe(url, e)),
                None => break,
            }
        }

        if let Some(total) = buffer.total() {
            if buffer.loaded() != total {
                return Err(LoadError::network(
                    url,
                    Some(status.as_u16()),
                    format!("body ended after {} of {} bytes", buffer.loaded(), total),
                ));
            }
        }

        tracing::debug!(url, bytes = buffer.loaded(), segments = buffer.segment_count(), "Download complete");
        Ok(buffer)
    }

    async fn read_file<F>(
        &self,
        url: &str,
        path: &Path,
        token: &CancellationToken,
        mut on_progress: F,
    ) -> Result<ByteBuffer, LoadError>
    where
        F: FnMut(&DownloadProgress),
    {
        let io_err = |e: std::io::Error| LoadError::network(url, None, e.to_string());

        let mut file = tokio::fs::File::open(path).await.map_err(io_err)?;
        let total = file.metadata().await.map_err(io_err)?.len();
        let mut buffer = ByteBuffer::new(Some(total));

        loop {
            if token.is_cancelled() {
                return Err(LoadError::Cancelled);
            }
            let mut segment = vec![0u8; FILE_READ_CHUNK];
            let n = file.read(&mut segment).await.map_err(io_err)?;
            if n == 0 {
                break;
            }
            segment.truncate(n);
            buffer.append(segment);
            on_progress(&buffer.progress());
        }

        Ok(buffer)
    }
}

fn describe(url: &str, e: reqwest::Error) -> LoadError {
    let status = e.status().map(|s| s.as_u16());
    let message = if e.is_connect() {
        format!("cannot connect: {}", e)
    } else if e.is_timeout() {
        format!("timed out: {}", e)
    } else {
        e.to_string()
    };
    LoadError::network(url, status, message)
}

/// Local filesystem path for `file://` URLs and bare paths.
fn local_path(url: &str) -> Option<PathBuf> {
    match Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "file" => parsed.to_file_path().ok(),
        // Windows drive letters parse as a one-letter scheme.
        Ok(parsed) if parsed.scheme().len() == 1 => Some(PathBuf::from(url)),
        Ok(_) => None,
        Err(_) => Some(PathBuf::from(url)),
    }
}

/// Where bytes for a URL come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Remote,
    Local,
}

fn origin(url: &str) -> Option<Origin> {
    if local_path(url).is_some() {
        return Some(Origin::Local);
    }
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Some(Origin::Remote),
        _ => None,
    }
}

/// Resolve a buffer or image URI relative to the model it was referenced
/// from.
///
/// The result must be fetched the same way as the model: a model served
/// over HTTP(S) may only reference HTTP(S) resources, and a local model
/// only local files. Anything else is an invalid model.
pub fn resolve_uri(base: &str, uri: &str) -> Result<String, LoadError> {
    let resolved = if Url::parse(uri).is_ok() {
        uri.to_string()
    } else {
        match Url::parse(base) {
            // Drive letters parse as a scheme but are plain paths.
            Ok(base_url) if base_url.scheme().len() > 1 => base_url
                .join(uri)
                .map(String::from)
                .map_err(|e| LoadError::invalid(format!("cannot resolve {} against {}: {}", uri, base, e)))?,
            _ => {
                let parent = Path::new(base).parent().unwrap_or_else(|| Path::new(""));
                parent.join(uri).to_string_lossy().into_owned()
            }
        }
    };

    match (origin(base), origin(&resolved)) {
        (Some(from), Some(to)) if from == to => Ok(resolved),
        _ => Err(LoadError::invalid(format!(
            "{} cannot be fetched from a model loaded from {}",
            uri, base
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_local_path_detection() {
        assert!(local_path("https://example.com/a.glb").is_none());
        assert_eq!(local_path("models/a.glb"), Some(PathBuf::from("models/a.glb")));
        #[cfg(unix)]
        assert_eq!(local_path("file:///tmp/a.glb"), Some(PathBuf::from("/tmp/a.glb")));
    }

    #[test]
    fn test_resolve_uri() {
        assert_eq!(
            resolve_uri("https://cdn.example.com/models/city.gltf", "city.bin").unwrap(),
            "https://cdn.example.com/models/city.bin"
        );
        assert_eq!(
            resolve_uri("https://cdn.example.com/models/city.gltf", "https://other.example.com/x.bin").unwrap(),
            "https://other.example.com/x.bin"
        );
        assert_eq!(resolve_uri("assets/city.gltf", "city.bin").unwrap(), "assets/city.bin");
        #[cfg(unix)]
        assert_eq!(
            resolve_uri("file:///srv/models/city.gltf", "city.bin").unwrap(),
            "file:///srv/models/city.bin"
        );
    }

    #[test]
    fn test_resolve_uri_keeps_the_model_origin() {
        let remote = "https://cdn.example.com/models/city.gltf";
        assert_eq!(resolve_uri(remote, "/etc/passwd").unwrap(), "https://cdn.example.com/etc/passwd");
        for uri in ["file:///etc/passwd", "ftp://cdn.example.com/city.bin"] {
            let err = resolve_uri(remote, uri).unwrap_err();
            assert_eq!(err.code(), "invalid-model", "{}", uri);
        }

        let err = resolve_uri("assets/city.gltf", "https://cdn.example.com/city.bin").unwrap_err();
        assert_eq!(err.code(), "invalid-model");
        #[cfg(unix)]
        assert!(resolve_uri("file:///srv/models/city.gltf", "http://localhost/city.bin").is_err());
    }

    #[tokio::test]
    async fn test_read_local_file_reports_progress() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data = vec![5u8; FILE_READ_CHUNK + 10];
        file.write_all(&data).unwrap();

        let downloader = Downloader::new("test").unwrap();
        let token = CancellationToken::new();
        let mut events = Vec::new();
        let buffer = downloader
            .download(file.path().to_str().unwrap(), &token, |p| events.push(*p))
            .await
            .unwrap();

        assert_eq!(buffer.into_bytes(), data);
        assert!(events.len() >= 2);
        assert_eq!(events.last().unwrap().percent, Some(100.0));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_local_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1u8; 16]).unwrap();

        let downloader = Downloader::new("test").unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = downloader
            .download(file.path().to_str().unwrap(), &token, |_| {})
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_file_is_network_error() {
        let downloader = Downloader::new("test").unwrap();
        let err = downloader
            .download("/definitely/not/here.glb", &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err.code(), "network-error");
    }
}
