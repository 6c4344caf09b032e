// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Error type for this crate.
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("URL parse error: {0:?}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP error: {0:?}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("background task failed: {0:?}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("I/O error on path {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("package {1} not found in repository {0}")]
    PackageNotFound(String, String),

    #[error("no packages found for repository {0}; populate the metadata store first")]
    RepositoryEmpty(String),

    #[error("bundle not found: {0}")]
    BundleNotFound(String),

    #[error("no bundle definitions found for {0}; populate the metadata store first")]
    BundlesEmpty(String),

    #[error("no manifests found for {0}; populate the metadata store first")]
    ManifestsEmpty(String),

    #[error("manifest component {1} not found for {0}")]
    ManifestComponentNotFound(String, String),

    #[error("error downloading {0}: {1:?}")]
    Download(String, std::io::Error),

    #[error("error extracting {0}: {1:?}")]
    Extract(String, std::io::Error),

    #[error("manifest parse error in {0}: {1}")]
    ManifestParse(String, String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ReleaseError {
    /// Whether this error represents an absent package, bundle, or manifest.
    ///
    /// These are diagnostics inside closure traversal and only fatal when they
    /// block top-level population.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::PackageNotFound(..)
            | Self::RepositoryEmpty(_)
            | Self::BundleNotFound(_)
            | Self::BundlesEmpty(_)
            | Self::ManifestsEmpty(_)
            | Self::ManifestComponentNotFound(..) => true,
            Self::Download(_, e) | Self::IoPath(_, e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, ReleaseError>;
