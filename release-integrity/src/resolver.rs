// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Dependency closure resolution.

For every source package encountered, a [DependencyClosure] accumulates the
transitive set of capabilities required and provided by the source package
and by every binary package it builds. Capabilities that are required but
never provided are *missing*: nothing in the release satisfies them.

Capability strings and package names are distinct namespaces. A
[CapabilityIndex] maps every capability to the packages providing it (each
package implicitly provides its own name). Traversal follows requirement
edges: a required capability leads to each package providing it.

Closures live in a caller-owned [ResolutionContext]. A [Resolver] binds the
binary and source repositories of a release and drives closure construction.
*/

use {
    crate::{
        catalog::{BundleSet, Package, Repository},
        error::Result,
    },
    log::{debug, warn},
    std::collections::{BTreeMap, BTreeSet},
};

/// Whether a capability is an `rpmlib(...)` tracking dependency.
///
/// These are satisfied by the package manager itself, never by a package.
pub fn is_rpmlib_capability(capability: &str) -> bool {
    capability.starts_with("rpmlib(")
}

/// Maps capability strings to the names of packages providing them.
#[derive(Clone, Debug, Default)]
pub struct CapabilityIndex {
    providers: BTreeMap<String, BTreeSet<String>>,
}

impl CapabilityIndex {
    /// Build an index over every package of a repository.
    pub fn new(repository: &Repository) -> Self {
        let mut index = Self::default();

        for package in repository.packages() {
            index.add_package(package);
        }

        index
    }

    fn add_package(&mut self, package: &Package) {
        self.providers
            .entry(package.name.clone())
            .or_default()
            .insert(package.name.clone());

        for capability in &package.provides {
            self.providers
                .entry(capability.clone())
                .or_default()
                .insert(package.name.clone());
        }
    }

    /// Names of packages providing a capability.
    pub fn providers(&self, capability: &str) -> impl Iterator<Item = &str> {
        self.providers
            .get(capability)
            .into_iter()
            .flat_map(|names| names.iter().map(|s| s.as_str()))
    }

    pub fn is_provided(&self, capability: &str) -> bool {
        self.providers.contains_key(capability)
    }

    /// Number of distinct capabilities indexed.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// A repository paired with its capability index.
#[derive(Clone, Debug)]
pub struct PackageUniverse<'repo> {
    repository: &'repo Repository,
    index: CapabilityIndex,
}

impl<'repo> PackageUniverse<'repo> {
    pub fn new(repository: &'repo Repository) -> Self {
        Self {
            repository,
            index: CapabilityIndex::new(repository),
        }
    }

    pub fn repository(&self) -> &'repo Repository {
        self.repository
    }

    pub fn index(&self) -> &CapabilityIndex {
        &self.index
    }

    /// Resolve the packages providing a capability.
    pub fn providers(&self, capability: &str) -> Vec<&'repo Package> {
        self.index
            .providers(capability)
            .filter_map(|name| self.repository.get_package(name).ok())
            .collect()
    }

    /// Visit every package reachable from `start` via requirement edges.
    ///
    /// Packages whose name is already in `visited` are neither visited nor
    /// traversed through, so each package is visited at most once per
    /// `visited` set regardless of cycles.
    fn walk<'a>(
        &'a self,
        start: &'a Package,
        visited: &mut BTreeSet<String>,
        mut visit: impl FnMut(&'a Package),
    ) {
        let mut stack = vec![start];

        while let Some(package) = stack.pop() {
            if !visited.insert(package.name.clone()) {
                continue;
            }

            visit(package);

            for capability in &package.requires {
                let providers = self.providers(capability);

                if providers.is_empty() {
                    debug!(
                        "{}: no provider of {} required by {}",
                        self.repository.key(),
                        capability,
                        package.name
                    );
                }

                stack.extend(
                    providers
                        .into_iter()
                        .filter(|dep| !visited.contains(&dep.name)),
                );
            }
        }
    }
}

/// Transitive requirements and provisions of a single source package.
#[derive(Clone, Debug)]
pub struct DependencyClosure {
    name: String,
    source: Option<Package>,
    packages: BTreeMap<String, Package>,
    provides: BTreeSet<String>,
    requires: BTreeSet<String>,
    rpmlib_provided: bool,
}

impl DependencyClosure {
    /// Construct an empty closure for a source package name.
    ///
    /// `source` is `None` when the source package could not be found.
    pub fn new(name: impl ToString, source: Option<Package>) -> Self {
        Self {
            name: name.to_string(),
            source,
            packages: BTreeMap::new(),
            provides: BTreeSet::new(),
            requires: BTreeSet::new(),
            rpmlib_provided: true,
        }
    }

    /// Set whether `rpmlib(...)` requirements count as provided.
    pub fn set_rpmlib_provided(&mut self, value: bool) {
        self.rpmlib_provided = value;
    }

    /// The source package name this closure represents.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> Option<&Package> {
        self.source.as_ref()
    }

    /// Binary packages contributed to this closure, keyed by name.
    pub fn packages(&self) -> &BTreeMap<String, Package> {
        &self.packages
    }

    pub fn provides(&self) -> &BTreeSet<String> {
        &self.provides
    }

    pub fn requires(&self) -> &BTreeSet<String> {
        &self.requires
    }

    /// Attach a binary package. Re-adding a package of the same name replaces it.
    pub fn add_package(&mut self, package: Package) {
        self.packages.insert(package.name.clone(), package);
    }

    /// Accumulate the transitive requirements of a package.
    ///
    /// Every required capability of `package` is recorded, then each package
    /// of `universe` providing it is traversed in turn.
    pub fn recursive_requires(
        &mut self,
        package: &Package,
        universe: &PackageUniverse,
        visited: &mut BTreeSet<String>,
    ) {
        let rpmlib_provided = self.rpmlib_provided;
        let requires = &mut self.requires;
        let provides = &mut self.provides;

        universe.walk(package, visited, |p| {
            for capability in &p.requires {
                requires.insert(capability.clone());

                if rpmlib_provided && is_rpmlib_capability(capability) {
                    provides.insert(capability.clone());
                }
            }
        });
    }

    /// Accumulate the transitive provisions of a package.
    ///
    /// Walks the same requirement graph as [Self::recursive_requires()],
    /// recording the name and provided capabilities of every package reached.
    pub fn recursive_provides(
        &mut self,
        package: &Package,
        universe: &PackageUniverse,
        visited: &mut BTreeSet<String>,
    ) {
        let provides = &mut self.provides;

        universe.walk(package, visited, |p| {
            provides.insert(p.name.clone());
            provides.extend(p.provides.iter().cloned());
        });
    }

    /// Accumulate both requirements and provisions of a package.
    pub fn accumulate(&mut self, package: &Package, universe: &PackageUniverse) {
        self.recursive_requires(package, universe, &mut BTreeSet::new());
        self.recursive_provides(package, universe, &mut BTreeSet::new());
    }

    /// Capabilities required transitively but never provided transitively.
    pub fn missing(&self) -> Vec<String> {
        self.requires
            .difference(&self.provides)
            .cloned()
            .collect()
    }
}

/// A non-fatal lookup failure recorded during resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Diagnostic {
    /// A package named by a bundle is not in the binary repository.
    BinaryPackageNotFound(String),
    /// The source package of a binary package is not in the source repository.
    ///
    /// Members are the binary package name and the source package name.
    SourcePackageNotFound(String, String),
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BinaryPackageNotFound(name) => {
                write!(f, "binary package {} not found", name)
            }
            Self::SourcePackageNotFound(binary, source) => {
                write!(f, "source package {} of {} not found", source, binary)
            }
        }
    }
}

/// Holds the dependency closures of a resolution run.
#[derive(Clone, Debug, Default)]
pub struct ResolutionContext {
    closures: BTreeMap<String, DependencyClosure>,
    diagnostics: Vec<Diagnostic>,
}

impl ResolutionContext {
    /// Obtain the closure for a source package name.
    pub fn closure(&self, source: &str) -> Option<&DependencyClosure> {
        self.closures.get(source)
    }

    /// Iterate over closures in source package name order.
    pub fn closures(&self) -> impl Iterator<Item = &DependencyClosure> {
        self.closures.values()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Summarize the missing capabilities of every closure.
    pub fn report(&self) -> ResolutionReport {
        ResolutionReport {
            sources: self
                .closures
                .values()
                .map(|closure| SourceReport {
                    source: closure.name().to_string(),
                    packages: closure.packages().keys().cloned().collect(),
                    missing: closure.missing(),
                })
                .collect(),
            diagnostics: self.diagnostics.clone(),
        }
    }
}

/// Resolution outcome for one source package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceReport {
    pub source: String,
    /// Binary packages resolved under this source package.
    pub packages: Vec<String>,
    /// Capabilities nothing in the closure provides.
    pub missing: Vec<String>,
}

/// Resolution outcome across all source packages of a run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResolutionReport {
    pub sources: Vec<SourceReport>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ResolutionReport {
    /// Source packages with at least one missing capability.
    pub fn failures(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|s| !s.missing.is_empty())
    }

    /// Total number of missing capabilities across source packages.
    pub fn missing_count(&self) -> usize {
        self.sources.iter().map(|s| s.missing.len()).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_count() == 0
    }
}

/// Resolves dependency closures against a binary and a source repository.
pub struct Resolver<'repo> {
    binary: PackageUniverse<'repo>,
    source: PackageUniverse<'repo>,
    rpmlib_provided: bool,
}

impl<'repo> Resolver<'repo> {
    /// Construct an instance, indexing both repositories.
    pub fn new(binary: &'repo Repository, source: &'repo Repository) -> Self {
        Self {
            binary: PackageUniverse::new(binary),
            source: PackageUniverse::new(source),
            rpmlib_provided: true,
        }
    }

    /// Set whether `rpmlib(...)` requirements count as provided.
    pub fn set_rpmlib_provided(&mut self, value: bool) {
        self.rpmlib_provided = value;
    }

    pub fn binary(&self) -> &PackageUniverse<'repo> {
        &self.binary
    }

    pub fn source(&self) -> &PackageUniverse<'repo> {
        &self.source
    }

    /// Fold a binary package into the closure of its source package.
    ///
    /// The closure is created on first encounter of the source package and
    /// seeded with the source package's own requirements and provisions. If
    /// the source package is unknown, a diagnostic is recorded and the closure
    /// is created unseeded.
    pub fn build_closure(&self, ctx: &mut ResolutionContext, package: &Package) {
        let source_name = package.source_package_name();

        if !ctx.closures.contains_key(source_name) {
            let closure = match self.source.repository().get_package(source_name) {
                Ok(source) => {
                    let mut closure = self.new_closure(source_name, Some(source.clone()));
                    closure.accumulate(source, &self.source);
                    closure
                }
                Err(e) => {
                    warn!("{}", e);
                    ctx.diagnostics.push(Diagnostic::SourcePackageNotFound(
                        package.name.clone(),
                        source_name.to_string(),
                    ));
                    self.new_closure(source_name, None)
                }
            };

            ctx.closures.insert(source_name.to_string(), closure);
        }

        if let Some(closure) = ctx.closures.get_mut(source_name) {
            closure.add_package(package.clone());
            closure.accumulate(package, &self.binary);
        }
    }

    fn new_closure(&self, name: &str, source: Option<Package>) -> DependencyClosure {
        let mut closure = DependencyClosure::new(name, source);
        closure.set_rpmlib_provided(self.rpmlib_provided);
        closure
    }

    /// Resolve closures for binary packages given by name.
    pub fn resolve_packages<'name>(
        &self,
        ctx: &mut ResolutionContext,
        names: impl IntoIterator<Item = &'name str>,
    ) {
        for name in names {
            match self.binary.repository().get_package(name) {
                Ok(package) => self.build_closure(ctx, package),
                Err(e) => {
                    warn!("{}", e);
                    ctx.diagnostics
                        .push(Diagnostic::BinaryPackageNotFound(name.to_string()));
                }
            }
        }
    }

    /// Resolve every package of a bundle (or of all bundles if `bundle` is empty).
    pub fn resolve_bundle(&self, bundles: &BundleSet, bundle: &str) -> Result<ResolutionReport> {
        let names = bundles.all_packages(bundle)?;

        let mut ctx = ResolutionContext::default();
        self.resolve_packages(&mut ctx, names.iter().map(|s| s.as_str()));

        Ok(ctx.report())
    }
}
