// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Release metadata providers.

A [MetadataProvider] exposes the package, bundle, and manifest metadata of
releases as stored by some backing store. The core only needs these lookups;
how and where the metadata is persisted is up to the implementation.

[MemoryMetadataProvider] is a provider backed by in-process maps. It is
useful for tests and for callers that assemble metadata themselves.
*/

use {
    crate::{
        catalog::{BundleDefinition, Package, ReleaseKey, RepositoryKey},
        error::{ReleaseError, Result},
        manifest::{FileEntry, ManifestIndex},
    },
    std::collections::{BTreeMap, BTreeSet},
};

/// Read interface to a store of release metadata.
pub trait MetadataProvider: Sync {
    /// Obtain the names of all packages in a repository.
    fn fetch_package_names(&self, repository: &RepositoryKey) -> Result<BTreeSet<String>>;

    /// Obtain a single package from a repository.
    ///
    /// Fails with [ReleaseError::PackageNotFound] if absent.
    fn fetch_package(&self, repository: &RepositoryKey, name: &str) -> Result<Package>;

    /// Obtain the names of all bundles defined for a release.
    fn fetch_bundle_names(&self, release: &ReleaseKey) -> Result<BTreeSet<String>>;

    /// Obtain a single bundle definition.
    fn fetch_bundle(&self, release: &ReleaseKey, name: &str) -> Result<BundleDefinition>;

    /// Obtain the top-level component index of a release.
    fn fetch_manifest_index(&self, release: &ReleaseKey) -> Result<ManifestIndex>;

    /// Obtain the file entries of a component manifest.
    ///
    /// `release` carries the version the component was last changed at, which
    /// may differ from the version of the index referencing it.
    fn fetch_manifest_files(&self, release: &ReleaseKey, component: &str)
        -> Result<Vec<FileEntry>>;

    /// Obtain the expanded package list of a bundle.
    ///
    /// An empty `bundle` yields the union across all bundles of the release.
    fn fetch_bundle_all_packages(
        &self,
        release: &ReleaseKey,
        bundle: &str,
    ) -> Result<BTreeSet<String>> {
        if !bundle.is_empty() {
            return Ok(self.fetch_bundle(release, bundle)?.all_packages);
        }

        let mut res = BTreeSet::new();
        for name in self.fetch_bundle_names(release)? {
            res.extend(self.fetch_bundle(release, &name)?.all_packages);
        }

        Ok(res)
    }
}

/// A [MetadataProvider] holding everything in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryMetadataProvider {
    packages: BTreeMap<RepositoryKey, BTreeMap<String, Package>>,
    bundles: BTreeMap<ReleaseKey, BTreeMap<String, BundleDefinition>>,
    indices: BTreeMap<ReleaseKey, ManifestIndex>,
    manifest_files: BTreeMap<(ReleaseKey, String), Vec<FileEntry>>,
}

impl MemoryMetadataProvider {
    /// Register a package with a repository, replacing any package of the same name.
    pub fn add_package(&mut self, repository: &RepositoryKey, package: Package) {
        self.packages
            .entry(repository.clone())
            .or_default()
            .insert(package.name.clone(), package);
    }

    pub fn add_bundle(&mut self, release: &ReleaseKey, bundle: BundleDefinition) {
        self.bundles
            .entry(release.clone())
            .or_default()
            .insert(bundle.name.clone(), bundle);
    }

    pub fn set_manifest_index(&mut self, release: &ReleaseKey, index: ManifestIndex) {
        self.indices.insert(release.clone(), index);
    }

    pub fn set_manifest_files(
        &mut self,
        release: &ReleaseKey,
        component: impl ToString,
        files: Vec<FileEntry>,
    ) {
        self.manifest_files
            .insert((release.clone(), component.to_string()), files);
    }
}

impl MetadataProvider for MemoryMetadataProvider {
    fn fetch_package_names(&self, repository: &RepositoryKey) -> Result<BTreeSet<String>> {
        Ok(self
            .packages
            .get(repository)
            .map(|packages| packages.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn fetch_package(&self, repository: &RepositoryKey, name: &str) -> Result<Package> {
        self.packages
            .get(repository)
            .and_then(|packages| packages.get(name))
            .cloned()
            .ok_or_else(|| ReleaseError::PackageNotFound(repository.to_string(), name.to_string()))
    }

    fn fetch_bundle_names(&self, release: &ReleaseKey) -> Result<BTreeSet<String>> {
        Ok(self
            .bundles
            .get(release)
            .map(|bundles| bundles.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn fetch_bundle(&self, release: &ReleaseKey, name: &str) -> Result<BundleDefinition> {
        self.bundles
            .get(release)
            .and_then(|bundles| bundles.get(name))
            .cloned()
            .ok_or_else(|| ReleaseError::BundleNotFound(name.to_string()))
    }

    fn fetch_manifest_index(&self, release: &ReleaseKey) -> Result<ManifestIndex> {
        self.indices
            .get(release)
            .cloned()
            .ok_or_else(|| ReleaseError::ManifestsEmpty(release.to_string()))
    }

    fn fetch_manifest_files(
        &self,
        release: &ReleaseKey,
        component: &str,
    ) -> Result<Vec<FileEntry>> {
        self.manifest_files
            .get(&(release.clone(), component.to_string()))
            .cloned()
            .ok_or_else(|| {
                ReleaseError::ManifestComponentNotFound(release.to_string(), component.to_string())
            })
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::catalog::{BundleSet, Repository, RepositoryKind},
    };

    #[test]
    fn populate_repository() -> Result<()> {
        let release = ReleaseKey::new("clear", 10);
        let key = release.repository(RepositoryKind::Binary);

        let mut provider = MemoryMetadataProvider::default();

        assert!(matches!(
            Repository::populate(&provider, key.clone()),
            Err(ReleaseError::RepositoryEmpty(_))
        ));

        provider.add_package(&key, Package::new("bash"));
        provider.add_package(&key, Package::new("glibc"));

        let repo = Repository::populate(&provider, key)?;
        assert_eq!(repo.package_names().collect::<Vec<_>>(), vec!["bash", "glibc"]);

        // Source repository of the same release is distinct.
        assert!(Repository::populate(&provider, release.repository(RepositoryKind::Source)).is_err());

        Ok(())
    }

    #[test]
    fn bundle_all_packages_union() -> Result<()> {
        let release = ReleaseKey::new("clear", 10);
        let mut provider = MemoryMetadataProvider::default();

        assert!(matches!(
            BundleSet::populate(&provider, &release, ""),
            Err(ReleaseError::BundlesEmpty(_))
        ));

        provider.add_bundle(
            &release,
            BundleDefinition {
                name: "a".into(),
                all_packages: BTreeSet::from(["x".to_string(), "y".to_string()]),
                ..Default::default()
            },
        );
        provider.add_bundle(
            &release,
            BundleDefinition {
                name: "b".into(),
                all_packages: BTreeSet::from(["y".to_string(), "z".to_string()]),
                ..Default::default()
            },
        );

        assert_eq!(provider.fetch_bundle_all_packages(&release, "")?.len(), 3);
        assert_eq!(provider.fetch_bundle_all_packages(&release, "a")?.len(), 2);

        let bundles = BundleSet::populate(&provider, &release, "b")?;
        assert_eq!(bundles.len(), 1);
        assert!(BundleSet::populate(&provider, &release, "c").is_err());

        Ok(())
    }
}
