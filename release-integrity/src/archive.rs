// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Archive extraction.

Manifests and file content are published as tar archives, optionally
compressed. Compression is detected from the leading magic bytes.
*/

use {
    crate::error::{ReleaseError, Result},
    std::{
        collections::BTreeSet,
        io::{BufRead, BufReader, Read},
        path::{Component, Path, PathBuf},
    },
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompressionFormat {
    None,
    Gzip,
    Xz,
    Zstd,
}

impl CompressionFormat {
    /// Detect the compression of data from its leading bytes.
    pub fn detect(header: &[u8]) -> Self {
        if header.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else if header.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Self::Xz
        } else if header.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Self::Zstd
        } else {
            Self::None
        }
    }
}

fn get_decompression_stream<'a>(
    format: CompressionFormat,
    reader: impl BufRead + 'a,
) -> std::io::Result<Box<dyn Read + 'a>> {
    match format {
        CompressionFormat::None => Ok(Box::new(reader)),
        CompressionFormat::Zstd => Ok(Box::new(zstd::stream::read::Decoder::with_buffer(
            reader,
        )?)),
        CompressionFormat::Xz => Ok(Box::new(xz2::read::XzDecoder::new(reader))),
        CompressionFormat::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(reader))),
    }
}

/// Extract a tar archive into a directory.
///
/// Entries are unpacked into a staging directory inside `dest_dir` and only
/// moved into place once the whole archive has been read. A corrupt or
/// truncated archive leaves nothing behind in `dest_dir`. Existing top-level
/// paths in `dest_dir` that the archive also holds are replaced.
///
/// Returns the paths of the extracted entries, relative to `dest_dir`.
pub fn extract_archive(archive_path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let err = |e: std::io::Error| ReleaseError::Extract(format!("{}", archive_path.display()), e);

    let fh = std::fs::File::open(archive_path).map_err(err)?;
    let mut reader = BufReader::new(fh);

    let format = CompressionFormat::detect(reader.fill_buf().map_err(err)?);

    std::fs::create_dir_all(dest_dir).map_err(err)?;

    let staging = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(dest_dir)
        .map_err(err)?;

    let mut archive = tar::Archive::new(get_decompression_stream(format, reader).map_err(err)?);
    let mut paths = vec![];

    for entry in archive.entries().map_err(err)? {
        let mut entry = entry.map_err(err)?;
        let path = entry.path().map_err(err)?.to_path_buf();

        // unpack_in() refuses paths escaping the staging directory.
        if entry.unpack_in(staging.path()).map_err(err)? {
            paths.push(path);
        }
    }

    if paths.is_empty() {
        return Err(err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "archive has no entries",
        )));
    }

    let roots = paths
        .iter()
        .filter_map(|p| {
            p.components().find_map(|c| match c {
                Component::Normal(name) => Some(name.to_os_string()),
                _ => None,
            })
        })
        .collect::<BTreeSet<_>>();

    for root in roots {
        let target = dest_dir.join(&root);

        if let Ok(metadata) = std::fs::symlink_metadata(&target) {
            if metadata.is_dir() {
                std::fs::remove_dir_all(&target).map_err(err)?;
            } else {
                std::fs::remove_file(&target).map_err(err)?;
            }
        }

        std::fs::rename(staging.path().join(&root), &target).map_err(err)?;
    }

    Ok(paths)
}

/// Extract a tar archive into a directory on the blocking thread pool.
pub async fn extract_archive_blocking(
    archive_path: PathBuf,
    dest_dir: PathBuf,
) -> Result<Vec<PathBuf>> {
    tokio::task::spawn_blocking(move || extract_archive(&archive_path, &dest_dir)).await?
}
