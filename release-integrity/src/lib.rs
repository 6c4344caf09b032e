// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Linux distribution release validation.

This crate validates the integrity and completeness of a release composed of
binary packages, the source packages building them, bundle (package group)
definitions, and swupd content manifests.

Two pipelines are provided:

* Dependency closure resolution. Given a [catalog::Repository] of binary
  packages, one of source packages, and [catalog::BundleSet] definitions,
  [resolver::Resolver] computes for each source package the transitive set
  of required and provided capabilities and derives the capabilities nothing
  in the release provides.
* Content materialization. [loader] fetches the top-level manifest index (the
  *MoM*) and every component manifest it references into a local cache.
  [fetcher::ContentFetcher] then downloads and extracts every file archive
  the manifests reference, concurrently.

Release metadata comes from a [provider::MetadataProvider]. Release content
comes from a [ContentOrigin], which is bound to a base URL.
[http::HttpOrigin] reads from HTTP servers and [filesystem::FilesystemOrigin]
from a local mirror.

# Remote and Cache Layout

Content is addressed relative to the origin base URL as
`update/{version}/Manifest.{component}.tar` for manifests and
`update/{version}/files/{hash}.tar` for file content. Archives are extracted
into the cache root using the same relative layout minus the `.tar`
extension. The extracted paths double as cache keys: once present they are
trusted and never fetched again.
*/

pub mod archive;
pub mod catalog;
pub mod check;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod filesystem;
pub mod http;
pub mod loader;
pub mod manifest;
pub mod provider;
pub mod resolver;
#[cfg(test)]
mod testutil;

pub use crate::error::{ReleaseError, Result};

use {
    async_trait::async_trait,
    futures::AsyncRead,
    std::{
        path::{Path, PathBuf},
        pin::Pin,
    },
};

/// Default number of concurrent content fetches.
pub const DEFAULT_FETCH_WORKERS: usize = 8;

/// Origin relative path of a component manifest archive.
pub fn manifest_archive_path(version: u32, component: &str) -> String {
    format!("update/{}/Manifest.{}.tar", version, component)
}

/// Origin relative path of a file content archive.
pub fn file_archive_path(version: u32, hash: &str) -> String {
    format!("update/{}/files/{}.tar", version, hash)
}

/// Cache path of an extracted component manifest.
pub fn manifest_cache_path(cache_root: &Path, version: u32, component: &str) -> PathBuf {
    cache_root
        .join("update")
        .join(version.to_string())
        .join(format!("Manifest.{}", component))
}

/// Cache path of a file content archive, before extraction.
pub fn file_archive_cache_path(cache_root: &Path, version: u32, hash: &str) -> PathBuf {
    cache_root
        .join("update")
        .join(version.to_string())
        .join("files")
        .join(format!("{}.tar", hash))
}

/// A read-only source of release content, bound to a base URL.
#[async_trait]
pub trait ContentOrigin: Sync {
    /// Obtain the URL to which this origin is bound.
    fn url(&self) -> Result<url::Url>;

    /// Get the content of a relative path as an async reader.
    ///
    /// Content that cannot be obtained is reported as [ReleaseError::Download],
    /// with [std::io::ErrorKind::NotFound] when the path does not exist.
    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>>;

    /// Resolve the full URL of a relative path.
    fn path_url(&self, path: &str) -> Result<url::Url> {
        Ok(self.url()?.join(path)?)
    }

    /// Download the content of a relative path to a local file.
    ///
    /// Parent directories of `dest` are created as needed. Returns the number of
    /// bytes written.
    async fn download_to_path(&self, path: &str, dest: &Path) -> Result<u64> {
        let url = self.path_url(path)?;

        let reader = self.get_path(path).await?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ReleaseError::IoPath(format!("{}", parent.display()), e))?;
        }

        let fh = std::fs::File::create(dest)
            .map_err(|e| ReleaseError::IoPath(format!("{}", dest.display()), e))?;
        let mut writer = futures::io::AllowStdIo::new(fh);

        futures::io::copy(reader, &mut writer)
            .await
            .map_err(|e| ReleaseError::Download(url.to_string(), e))
    }
}
