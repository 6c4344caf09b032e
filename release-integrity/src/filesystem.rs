// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Release content mirrored on a local filesystem. */

use {
    crate::{
        error::{ReleaseError, Result},
        ContentOrigin,
    },
    async_trait::async_trait,
    futures::{io::BufReader, AsyncRead},
    std::{
        path::{Path, PathBuf},
        pin::Pin,
    },
    url::Url,
};

/// A content origin backed by a directory holding `update/`.
#[derive(Clone, Debug)]
pub struct FilesystemOrigin {
    root_dir: PathBuf,
}

impl FilesystemOrigin {
    /// Construct a new instance, bound to the root directory specified.
    ///
    /// No validation of the passed path is performed.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root_dir: path.as_ref().to_path_buf(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}

#[async_trait]
impl ContentOrigin for FilesystemOrigin {
    fn url(&self) -> Result<Url> {
        Url::from_directory_path(&self.root_dir).map_err(|_| {
            ReleaseError::IoPath(
                format!("{}", self.root_dir.display()),
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "error converting filesystem path to URL",
                ),
            )
        })
    }

    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let path = self.root_dir.join(path);

        let f = std::fs::File::open(&path)
            .map_err(|e| ReleaseError::Download(format!("{}", path.display()), e))?;

        Ok(Box::pin(BufReader::new(futures::io::AllowStdIo::new(f))))
    }
}

/// Construct a [ContentOrigin] from a string.
///
/// `http://` and `https://` values yield an [crate::http::HttpOrigin]. `file://`
/// URLs and anything else (interpreted as a path) yield a [FilesystemOrigin].
pub fn origin_from_str(s: impl ToString) -> Result<Box<dyn ContentOrigin + Send>> {
    let s = s.to_string();

    if s.starts_with("http://") || s.starts_with("https://") {
        Ok(Box::new(crate::http::HttpOrigin::new(s)?))
    } else if s.starts_with("file://") {
        let url = Url::parse(&s)?;
        let path = url.to_file_path().map_err(|_| {
            ReleaseError::IoPath(
                s.clone(),
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "error converting file URL to filesystem path",
                ),
            )
        })?;

        Ok(Box::new(FilesystemOrigin::new(path)))
    } else {
        Ok(Box::new(FilesystemOrigin::new(s)))
    }
}

#[cfg(test)]
mod test {
    use {super::*, futures::AsyncReadExt};

    #[tokio::test]
    async fn read_and_download() -> Result<()> {
        let temp = tempfile::Builder::new()
            .prefix("release-integrity-test")
            .tempdir()
            .map_err(|e| ReleaseError::IoPath("tempdir".into(), e))?;

        let mirror = temp.path().join("mirror");
        std::fs::create_dir_all(mirror.join("update"))
            .map_err(|e| ReleaseError::IoPath("mirror".into(), e))?;
        std::fs::write(mirror.join("update").join("latest"), b"30\n")
            .map_err(|e| ReleaseError::IoPath("latest".into(), e))?;

        let origin = FilesystemOrigin::new(&mirror);
        assert!(origin.url()?.as_str().ends_with("/mirror/"));

        let mut data = vec![];
        origin
            .get_path("update/latest")
            .await?
            .read_to_end(&mut data)
            .await
            .map_err(|e| ReleaseError::IoPath("read".into(), e))?;
        assert_eq!(data, b"30\n");

        let dest = temp.path().join("cache").join("nested").join("latest");
        assert_eq!(origin.download_to_path("update/latest", &dest).await?, 3);
        assert!(dest.exists());

        let err = origin
            .download_to_path("update/missing", &temp.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Download(..)));
        assert!(err.is_not_found());

        Ok(())
    }

    #[test]
    fn from_str() -> Result<()> {
        assert!(origin_from_str("https://cdn.download.clearlinux.org")?
            .url()?
            .as_str()
            .starts_with("https://"));
        assert_eq!(
            origin_from_str("/srv/mirror")?.url()?.as_str(),
            "file:///srv/mirror/"
        );
        assert_eq!(
            origin_from_str("file:///srv/mirror")?.url()?.as_str(),
            "file:///srv/mirror/"
        );

        Ok(())
    }
}
