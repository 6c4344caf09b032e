// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! End-to-end release checks.

These functions wire the lower level primitives together: populating
repositories from a [MetadataProvider] before resolving dependency closures,
and resolving a release version before materializing its content.
*/

use {
    crate::{
        catalog::{BundleSet, ReleaseKey, Repository, RepositoryKind},
        config::ReleaseConfig,
        error::{ReleaseError, Result},
        fetcher::{ContentFetcher, FetchEvent, FetchReport},
        filesystem::origin_from_str,
        loader::{fetch_latest_version, load_all},
        provider::MetadataProvider,
        resolver::{ResolutionReport, Resolver},
        ContentOrigin,
    },
    log::{info, warn},
};

/// Resolve dependency closures for the packages of a bundle in a release.
///
/// An empty `bundle` checks the packages of every bundle. Fails if the release
/// has no binary packages, no source packages, or no matching bundles.
pub fn check_dependencies(
    provider: &dyn MetadataProvider,
    release: &ReleaseKey,
    bundle: &str,
    rpmlib_provided: bool,
) -> Result<ResolutionReport> {
    let binary = Repository::populate(provider, release.repository(RepositoryKind::Binary))?;
    let source = Repository::populate(provider, release.repository(RepositoryKind::Source))?;
    let bundles = BundleSet::populate(provider, release, bundle)?;

    info!(
        "checking {} bundles against {} binary and {} source packages of {}",
        bundles.len(),
        binary.len(),
        source.len(),
        release
    );

    let mut resolver = Resolver::new(&binary, &source);
    resolver.set_rpmlib_provided(rpmlib_provided);

    let report = resolver.resolve_bundle(&bundles, bundle)?;

    for diagnostic in &report.diagnostics {
        warn!("{}", diagnostic);
    }
    for failure in report.failures() {
        warn!(
            "{} is missing: {}",
            failure.source,
            failure.missing.join(", ")
        );
    }

    Ok(report)
}

/// Determine the release version a configuration refers to.
pub async fn resolve_version(config: &ReleaseConfig, origin: &dyn ContentOrigin) -> Result<u32> {
    match (config.version, config.latest) {
        (Some(version), false) => Ok(version),
        (None, true) => {
            let version = fetch_latest_version(origin).await?;
            info!("latest version is {}", version);
            Ok(version)
        }
        (Some(_), true) => Err(ReleaseError::InvalidConfig(
            "version and latest are mutually exclusive".into(),
        )),
        (None, false) => Err(ReleaseError::InvalidConfig(
            "one of version or latest must be set".into(),
        )),
    }
}

/// Fetch the manifests and file content of the release a configuration describes.
pub async fn fetch_release_content(
    config: &ReleaseConfig,
    progress_cb: &Option<Box<dyn Fn(FetchEvent) + Sync>>,
) -> Result<FetchReport> {
    config.validate()?;

    let origin = origin_from_str(&config.origin_url)?;
    let version = resolve_version(config, origin.as_ref()).await?;

    let tree = load_all(origin.as_ref(), version, &config.cache_dir).await?;

    let mut fetcher = ContentFetcher::new(origin.as_ref(), &config.cache_dir);
    fetcher.set_workers(config.fetch_workers);

    fetcher.fetch_all(&tree, progress_cb).await
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            catalog::{BundleDefinition, Package},
            manifest::{FileEntry, FileFlags},
            provider::MemoryMetadataProvider,
            resolver::Diagnostic,
            testutil::{hash, manifest_text, temp_dir, Mirror},
        },
        std::collections::BTreeSet,
    };

    fn package(name: &str, requires: &[&str], provides: &[&str], source: &str) -> Package {
        Package {
            name: name.to_string(),
            source_package: source.to_string(),
            requires: requires.iter().map(|s| s.to_string()).collect(),
            provides: provides.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn dependencies() -> Result<()> {
        let release = ReleaseKey::new("clear", 10);
        let binary = release.repository(RepositoryKind::Binary);
        let source = release.repository(RepositoryKind::Source);

        let mut provider = MemoryMetadataProvider::default();

        assert!(matches!(
            check_dependencies(&provider, &release, "", true),
            Err(ReleaseError::RepositoryEmpty(_))
        ));

        provider.add_package(
            &binary,
            package(
                "vim",
                &["libncursesw.so.6", "libpython3.so", "rpmlib(CompressedFileNames)"],
                &[],
                "vim-8.2-1.src.rpm",
            ),
        );
        provider.add_package(
            &binary,
            package("ncurses", &[], &["libncursesw.so.6"], "ncurses-6.2-1.src.rpm"),
        );
        provider.add_package(
            &binary,
            package("orphan", &[], &[], "orphan-1.0-1.src.rpm"),
        );
        provider.add_package(&source, package("vim", &[], &[], ""));
        provider.add_package(&source, package("ncurses", &[], &[], ""));

        provider.add_bundle(
            &release,
            BundleDefinition {
                name: "editors".into(),
                all_packages: BTreeSet::from(["vim".to_string(), "absent".to_string()]),
                ..Default::default()
            },
        );
        provider.add_bundle(
            &release,
            BundleDefinition {
                name: "os-core".into(),
                all_packages: BTreeSet::from(["ncurses".to_string(), "orphan".to_string()]),
                ..Default::default()
            },
        );

        let report = check_dependencies(&provider, &release, "editors", true)?;
        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.sources[0].source, "vim");
        assert_eq!(report.sources[0].missing, vec!["libpython3.so".to_string()]);
        assert_eq!(
            report.diagnostics,
            vec![Diagnostic::BinaryPackageNotFound("absent".into())]
        );

        let report = check_dependencies(&provider, &release, "editors", false)?;
        assert_eq!(report.missing_count(), 2);

        let report = check_dependencies(&provider, &release, "", true)?;
        assert_eq!(report.sources.len(), 3);
        assert!(report.diagnostics.contains(&Diagnostic::SourcePackageNotFound(
            "orphan".into(),
            "orphan".into()
        )));

        assert!(matches!(
            check_dependencies(&provider, &release, "games", true),
            Err(ReleaseError::BundleNotFound(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn release_content() -> Result<()> {
        let temp = temp_dir();
        let mirror = Mirror::new(temp.path().join("mirror"));

        mirror.publish_mom(20, &[("os-core", 20), ("editors", 10)]);
        mirror.publish_manifest(
            20,
            "os-core",
            &manifest_text(
                20,
                &[
                    FileEntry::new("/usr/bin/bash", hash("bash"), 20, FileFlags::file()),
                    FileEntry::new("/usr/bin/sh", hash("bash"), 20, FileFlags::file()),
                ],
            ),
        );
        mirror.publish_manifest(
            10,
            "editors",
            &manifest_text(
                10,
                &[FileEntry::new("/usr/bin/vim", hash("vim"), 10, FileFlags::file())],
            ),
        );
        mirror.publish_file(20, &hash("bash"), b"bash");
        mirror.publish_file(10, &hash("vim"), b"vim");
        std::fs::write(mirror.root.join("latest"), "20\n").unwrap();

        let cache = temp.path().join("cache");
        let config = ReleaseConfig::from_toml_str(&format!(
            "origin_url = {:?}\ncache_dir = {:?}\nlatest = true\nfetch_workers = 2\n",
            mirror.root.display().to_string(),
            cache.display().to_string()
        ))?;

        let report = fetch_release_content(&config, &None).await?;
        assert_eq!(report.fetched.len(), 2);
        assert!(report.is_complete());
        assert!(cache
            .join("update")
            .join("10")
            .join("files")
            .join(hash("vim"))
            .exists());

        let config = ReleaseConfig {
            latest: false,
            version: None,
            ..config
        };
        assert!(matches!(
            fetch_release_content(&config, &None).await,
            Err(ReleaseError::InvalidConfig(_))
        ));

        Ok(())
    }
}
