// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Release content served via HTTP. */

use {
    crate::{
        error::{ReleaseError, Result},
        ContentOrigin,
    },
    async_trait::async_trait,
    futures::{AsyncRead, TryStreamExt},
    reqwest::{Client, ClientBuilder, IntoUrl, StatusCode, Url},
    std::pin::Pin,
};

/// Default HTTP user agent string.
pub const USER_AGENT: &str =
    "release-integrity Rust crate (https://crates.io/crates/release-integrity)";

/// Map an unsuccessful HTTP status to a download error.
///
/// 404 is reported with [std::io::ErrorKind::NotFound] so callers can tell
/// absent content from a failing server.
fn status_error(url: &Url, status: StatusCode) -> ReleaseError {
    let kind = if status == StatusCode::NOT_FOUND {
        std::io::ErrorKind::NotFound
    } else {
        std::io::ErrorKind::Other
    };

    ReleaseError::Download(
        url.to_string(),
        std::io::Error::new(kind, format!("HTTP status {}", status)),
    )
}

async fn fetch_url(
    client: &Client,
    root_url: &Url,
    path: &str,
) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
    let request_url = root_url.join(path)?;

    let res = client.get(request_url.clone()).send().await.map_err(|e| {
        ReleaseError::Download(
            request_url.to_string(),
            std::io::Error::new(std::io::ErrorKind::Other, format!("{}", e)),
        )
    })?;

    if !res.status().is_success() {
        return Err(status_error(&request_url, res.status()));
    }

    Ok(Box::pin(
        res.bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("{:?}", e)))
            .into_async_read(),
    ))
}

/// Release content origin served via HTTP.
///
/// Instances are bound to a base URL, the directory holding `update/`.
#[derive(Clone, Debug)]
pub struct HttpOrigin {
    /// HTTP client to use.
    client: Client,

    /// Base URL of the origin.
    root_url: Url,
}

impl HttpOrigin {
    /// Construct an instance bound to the specified URL.
    pub fn new(url: impl IntoUrl) -> Result<Self> {
        let builder = ClientBuilder::new().user_agent(USER_AGENT);

        Self::new_client(builder.build()?, url)
    }

    /// Construct an instance using the given [Client] and URL.
    pub fn new_client(client: Client, url: impl IntoUrl) -> Result<Self> {
        let mut root_url = url.into_url()?;

        // Trailing URLs are significant to the Url type when we .join(). So ensure
        // the URL has a trailing path.
        if !root_url.path().ends_with('/') {
            root_url.set_path(&format!("{}/", root_url.path()));
        }

        Ok(Self { client, root_url })
    }
}

#[async_trait]
impl ContentOrigin for HttpOrigin {
    fn url(&self) -> Result<Url> {
        Ok(self.root_url.clone())
    }

    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        fetch_url(&self.client, &self.root_url, path).await
    }
}
