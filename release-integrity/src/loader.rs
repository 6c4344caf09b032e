// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Manifest tree loading.

Manifests are fetched from a [ContentOrigin] into a cache directory, then
parsed. An extracted manifest already present in the cache is trusted and
not fetched again.

Loading is sequential: component manifests are small and are only known
once the top-level index is parsed.
*/

use {
    crate::{
        archive::extract_archive_blocking,
        error::{ReleaseError, Result},
        manifest::{Manifest, ManifestIndex, ManifestTree, MOM_NAME},
        manifest_archive_path, manifest_cache_path, ContentOrigin,
    },
    futures::AsyncReadExt,
    log::{debug, info, warn},
    std::path::Path,
};

/// Fetch a component manifest to `output_path`.
///
/// Does nothing if `output_path` already exists. Otherwise the manifest archive
/// for `component` at `version` is downloaded next to `output_path`, extracted,
/// and removed.
pub async fn fetch_manifest(
    origin: &dyn ContentOrigin,
    version: u32,
    component: &str,
    output_path: &Path,
) -> Result<()> {
    if std::fs::symlink_metadata(output_path).is_ok() {
        debug!("{} is cached", output_path.display());
        return Ok(());
    }

    let remote_path = manifest_archive_path(version, component);
    info!("fetching {}", origin.path_url(&remote_path)?);

    let dest_dir = output_path.parent().ok_or_else(|| {
        ReleaseError::IoPath(
            format!("{}", output_path.display()),
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent"),
        )
    })?;

    std::fs::create_dir_all(dest_dir)
        .map_err(|e| ReleaseError::IoPath(format!("{}", dest_dir.display()), e))?;

    let archive_path = dest_dir.join(format!("Manifest.{}.tar", component));

    let res = async {
        origin.download_to_path(&remote_path, &archive_path).await?;
        extract_archive_blocking(archive_path.clone(), dest_dir.to_path_buf()).await
    }
    .await;

    if let Err(e) = std::fs::remove_file(&archive_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("unable to remove {}: {:?}", archive_path.display(), e);
        }
    }

    res?;

    let extracted = dest_dir.join(format!("Manifest.{}", component));

    if extracted != output_path && extracted.exists() {
        std::fs::rename(&extracted, output_path)
            .map_err(|e| ReleaseError::IoPath(format!("{}", output_path.display()), e))?;
    }

    if !output_path.exists() {
        return Err(ReleaseError::Extract(
            remote_path,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("archive does not contain Manifest.{}", component),
            ),
        ));
    }

    Ok(())
}

/// Parse a manifest file from the cache.
pub fn read_manifest(path: &Path, component: &str) -> Result<Manifest> {
    let fh = std::fs::File::open(path)
        .map_err(|e| ReleaseError::IoPath(format!("{}", path.display()), e))?;

    Manifest::from_reader(component, std::io::BufReader::new(fh))
}

/// Fetch (if needed) and parse the top-level manifest index for a release version.
pub async fn load_top_level(
    origin: &dyn ContentOrigin,
    version: u32,
    cache_root: &Path,
) -> Result<ManifestIndex> {
    let path = manifest_cache_path(cache_root, version, MOM_NAME);

    fetch_manifest(origin, version, MOM_NAME, &path).await?;

    let index = ManifestIndex::from_manifest(&read_manifest(&path, MOM_NAME)?);

    if index.version != version {
        warn!(
            "Manifest.MoM fetched for version {} declares version {}",
            version, index.version
        );
    }

    Ok(index)
}

/// Load the full manifest tree of a release version.
///
/// Every component manifest is fetched at the version recorded for it in the
/// top-level index. The first fetch or parse error aborts loading.
pub async fn load_all(
    origin: &dyn ContentOrigin,
    version: u32,
    cache_root: &Path,
) -> Result<ManifestTree> {
    let index = load_top_level(origin, version, cache_root).await?;

    let mut manifests = Vec::with_capacity(index.components.len());

    for component in &index.components {
        let path = manifest_cache_path(cache_root, component.version, &component.name);

        fetch_manifest(origin, component.version, &component.name, &path).await?;
        manifests.push(read_manifest(&path, &component.name)?);
    }

    info!(
        "loaded {} component manifests for version {}",
        manifests.len(),
        version
    );

    Ok(ManifestTree { index, manifests })
}

/// Resolve the most recent release version published by an origin.
///
/// Reads the `latest` file at the root of the origin.
pub async fn fetch_latest_version(origin: &dyn ContentOrigin) -> Result<u32> {
    let mut reader = origin.get_path("latest").await?;

    let mut data = String::new();
    reader
        .read_to_string(&mut data)
        .await
        .map_err(|e| ReleaseError::IoPath("latest".to_string(), e))?;

    data.trim().parse::<u32>().map_err(|e| {
        ReleaseError::ManifestParse(
            "latest".to_string(),
            format!("invalid version {:?}: {}", data.trim(), e),
        )
    })
}
