// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! In-memory package catalog.

The catalog holds the packages, repositories, and bundle definitions of a
single release. It is populated from a [crate::provider::MetadataProvider]
and is read-only once populated.
*/

use {
    crate::{
        error::{ReleaseError, Result},
        provider::MetadataProvider,
    },
    log::{debug, warn},
    serde::{Deserialize, Serialize},
    std::{
        collections::{BTreeMap, BTreeSet},
        fmt::Formatter,
    },
};

/// A file installed by a package.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PackageFile {
    /// Absolute path of the installed file.
    pub path: String,
    /// Content digest of the file, if known.
    pub hash: Option<String>,
}

/// An installable unit.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Package {
    /// Package name. Unique within its repository.
    pub name: String,
    pub version: String,
    pub release: String,
    pub architecture: String,

    /// Reference to the source package that built this package.
    ///
    /// For binary packages this is usually the source RPM filename, e.g.
    /// `zlib-1.2.11-26.src.rpm`.
    pub source_package: String,

    pub license: String,

    /// Capabilities required at runtime.
    #[serde(default)]
    pub requires: Vec<String>,

    /// Capabilities required at build time.
    #[serde(default)]
    pub build_requires: Vec<String>,

    /// Capabilities this package provides.
    #[serde(default)]
    pub provides: Vec<String>,

    #[serde(default)]
    pub files: Vec<PackageFile>,
}

impl Package {
    /// Construct a package with just a name.
    pub fn new(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Resolve the name of the source package that built this package.
    ///
    /// Strips the `-{version}-{release}.src.rpm` suffix from the recorded source
    /// reference. A bare `.src.rpm` suffix is also removed. References that
    /// are already plain names are returned as-is.
    pub fn source_package_name(&self) -> &str {
        let source = self.source_package.as_str();

        let suffix = format!("-{}-{}.src.rpm", self.version, self.release);
        if let Some(name) = source.strip_suffix(&suffix) {
            return name;
        }

        if let Some(stem) = source.strip_suffix(".src.rpm") {
            // Version and release are the last two dash-delimited fields.
            let mut parts = stem.rsplitn(3, '-');
            if let (Some(_release), Some(_version), Some(name)) =
                (parts.next(), parts.next(), parts.next())
            {
                return name;
            }

            return stem;
        }

        source
    }
}

/// The flavor of packages held by a repository.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum RepositoryKind {
    /// Installable binary packages.
    Binary,
    /// Source packages.
    Source,
}

impl RepositoryKind {
    /// The suffix used for this kind in metadata store keys.
    pub fn key_suffix(&self) -> &'static str {
        match self {
            Self::Binary => "B",
            Self::Source => "SRPM",
        }
    }
}

/// Identifies the packages of a given release and flavor in a metadata store.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RepositoryKey {
    pub name: String,
    pub version: String,
    pub kind: RepositoryKind,
}

impl RepositoryKey {
    pub fn new(name: impl ToString, version: impl ToString, kind: RepositoryKind) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            kind,
        }
    }
}

impl std::fmt::Display for RepositoryKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.name, self.version, self.kind.key_suffix())
    }
}

/// Identifies a release (a mix name at a version) in a metadata store.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ReleaseKey {
    pub name: String,
    pub version: String,
}

impl ReleaseKey {
    pub fn new(name: impl ToString, version: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    /// Obtain the key of the repository of the given kind within this release.
    pub fn repository(&self, kind: RepositoryKind) -> RepositoryKey {
        RepositoryKey::new(&self.name, &self.version, kind)
    }

    /// Obtain the key of this release at another version.
    pub fn at_version(&self, version: impl ToString) -> Self {
        Self::new(&self.name, version)
    }
}

impl std::fmt::Display for ReleaseKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.name, self.version)
    }
}

/// A named, versioned collection of packages of a single kind.
#[derive(Clone, Debug)]
pub struct Repository {
    key: RepositoryKey,
    packages: BTreeMap<String, Package>,
}

impl Repository {
    /// Construct an empty repository.
    pub fn new(key: RepositoryKey) -> Self {
        Self {
            key,
            packages: BTreeMap::new(),
        }
    }

    /// Construct a repository from an iterable of packages.
    pub fn from_packages(key: RepositoryKey, packages: impl IntoIterator<Item = Package>) -> Self {
        let mut repo = Self::new(key);

        for package in packages {
            repo.add_package(package);
        }

        repo
    }

    /// Populate a repository with every package a metadata provider knows about.
    ///
    /// Errors if the provider has no packages for the repository, since nothing
    /// meaningful can be validated against an empty repository.
    pub fn populate(provider: &dyn MetadataProvider, key: RepositoryKey) -> Result<Self> {
        let names = provider.fetch_package_names(&key)?;

        if names.is_empty() {
            return Err(ReleaseError::RepositoryEmpty(key.to_string()));
        }

        let mut repo = Self::new(key);

        for name in names {
            let package = provider.fetch_package(&repo.key, &name)?;
            repo.add_package(package);
        }

        debug!("populated {} with {} packages", repo.key, repo.len());

        Ok(repo)
    }

    /// Register a package with this repository.
    ///
    /// Returns false and leaves the repository untouched if a package with
    /// the same name is already present.
    pub fn add_package(&mut self, package: Package) -> bool {
        if self.packages.contains_key(&package.name) {
            warn!(
                "ignoring duplicate package {} in repository {}",
                package.name, self.key
            );
            false
        } else {
            self.packages.insert(package.name.clone(), package);
            true
        }
    }

    pub fn key(&self) -> &RepositoryKey {
        &self.key
    }

    pub fn kind(&self) -> RepositoryKind {
        self.key.kind
    }

    /// Look up a package by its literal name.
    pub fn get_package(&self, name: &str) -> Result<&Package> {
        self.packages
            .get(name)
            .ok_or_else(|| ReleaseError::PackageNotFound(self.key.to_string(), name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// Iterate over packages in name order.
    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Descriptive fields of a bundle definition.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct BundleHeader {
    pub title: String,
    pub description: String,
    pub status: String,
    pub capabilities: String,
    pub maintainer: String,
}

/// A named group of packages.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct BundleDefinition {
    pub name: String,
    #[serde(default)]
    pub header: BundleHeader,

    /// Names of bundles included by this bundle.
    #[serde(default)]
    pub includes: BTreeSet<String>,

    /// Packages named directly by this bundle.
    #[serde(default)]
    pub direct_packages: BTreeSet<String>,

    /// The fully expanded package closure of this bundle.
    ///
    /// Always a superset of [Self::direct_packages]. Expansion is performed by
    /// the bundle tooling that produced the definition.
    #[serde(default)]
    pub all_packages: BTreeSet<String>,
}

/// Bundle definitions of a release, keyed by bundle name.
#[derive(Clone, Debug, Default)]
pub struct BundleSet {
    bundles: BTreeMap<String, BundleDefinition>,
}

impl BundleSet {
    /// Populate bundle definitions from a metadata provider.
    ///
    /// An empty `bundle` loads every bundle of the release. Otherwise only the
    /// named bundle is loaded.
    pub fn populate(
        provider: &dyn MetadataProvider,
        release: &ReleaseKey,
        bundle: &str,
    ) -> Result<Self> {
        let names = if bundle.is_empty() {
            provider.fetch_bundle_names(release)?
        } else {
            BTreeSet::from([bundle.to_string()])
        };

        if names.is_empty() {
            return Err(ReleaseError::BundlesEmpty(release.to_string()));
        }

        let mut res = Self::default();

        for name in names {
            res.insert(provider.fetch_bundle(release, &name)?);
        }

        Ok(res)
    }

    pub fn insert(&mut self, bundle: BundleDefinition) {
        self.bundles.insert(bundle.name.clone(), bundle);
    }

    pub fn get(&self, name: &str) -> Option<&BundleDefinition> {
        self.bundles.get(name)
    }

    pub fn bundles(&self) -> impl Iterator<Item = &BundleDefinition> {
        self.bundles.values()
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Resolve the expanded package list of a bundle.
    ///
    /// An empty name yields the union of all bundles' packages.
    pub fn all_packages(&self, bundle: &str) -> Result<BTreeSet<String>> {
        if bundle.is_empty() {
            Ok(self
                .bundles
                .values()
                .flat_map(|b| b.all_packages.iter().cloned())
                .collect())
        } else {
            self.bundles
                .get(bundle)
                .map(|b| b.all_packages.clone())
                .ok_or_else(|| ReleaseError::BundleNotFound(bundle.to_string()))
        }
    }
}

impl FromIterator<BundleDefinition> for BundleSet {
    fn from_iter<T: IntoIterator<Item = BundleDefinition>>(iter: T) -> Self {
        let mut res = Self::default();
        for bundle in iter {
            res.insert(bundle);
        }
        res
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn binary_package(name: &str, source: &str, version: &str, release: &str) -> Package {
        Package {
            name: name.to_string(),
            version: version.to_string(),
            release: release.to_string(),
            source_package: source.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn source_package_name() {
        let p = binary_package("zlib-dev", "zlib-1.2.11-26.src.rpm", "1.2.11", "26");
        assert_eq!(p.source_package_name(), "zlib");

        // Subpackages may be versioned differently than their source.
        let p = binary_package("perl-Foo", "perl-5.34.0-190.src.rpm", "1.0", "190");
        assert_eq!(p.source_package_name(), "perl");

        let p = binary_package("src-B-bin", "src-B", "1", "1");
        assert_eq!(p.source_package_name(), "src-B");
    }

    #[test]
    fn repository_key_display() {
        let release = ReleaseKey::new("clear", 30000);
        assert_eq!(release.to_string(), "clear30000");
        assert_eq!(
            release.repository(RepositoryKind::Binary).to_string(),
            "clear30000B"
        );
        assert_eq!(
            release.repository(RepositoryKind::Source).to_string(),
            "clear30000SRPM"
        );
    }

    #[test]
    fn repository_unique_names() {
        let key = RepositoryKey::new("clear", "10", RepositoryKind::Binary);
        let mut repo = Repository::new(key);

        let mut first = Package::new("a");
        first.version = "1".into();
        let mut second = Package::new("a");
        second.version = "2".into();

        assert!(repo.add_package(first));
        assert!(!repo.add_package(second));
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.get_package("a").unwrap().version, "1");

        let err = repo.get_package("missing").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn bundle_all_packages() {
        let bundles = vec![
            BundleDefinition {
                name: "os-core".into(),
                direct_packages: BTreeSet::from(["bash".to_string()]),
                all_packages: BTreeSet::from(["bash".to_string(), "glibc".to_string()]),
                ..Default::default()
            },
            BundleDefinition {
                name: "editors".into(),
                includes: BTreeSet::from(["os-core".to_string()]),
                direct_packages: BTreeSet::from(["vim".to_string()]),
                all_packages: BTreeSet::from(["vim".to_string(), "glibc".to_string()]),
                ..Default::default()
            },
        ]
        .into_iter()
        .collect::<BundleSet>();

        assert_eq!(
            bundles.all_packages("").unwrap(),
            BTreeSet::from(["bash".to_string(), "glibc".to_string(), "vim".to_string()])
        );
        assert_eq!(bundles.all_packages("editors").unwrap().len(), 2);
        assert!(matches!(
            bundles.all_packages("nope"),
            Err(ReleaseError::BundleNotFound(_))
        ));
    }
}
