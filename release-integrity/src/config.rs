// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Release validation configuration. */

use {
    crate::{
        catalog::ReleaseKey,
        error::{ReleaseError, Result},
        DEFAULT_FETCH_WORKERS,
    },
    serde::{Deserialize, Serialize},
    std::path::{Path, PathBuf},
};

fn default_name() -> String {
    "clear".to_string()
}

fn default_fetch_workers() -> usize {
    DEFAULT_FETCH_WORKERS
}

fn default_true() -> bool {
    true
}

/// Describes the release to validate and where its content lives.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReleaseConfig {
    /// Name of the mix the release belongs to.
    #[serde(default = "default_name")]
    pub name: String,

    /// The URL or path of the content origin.
    ///
    /// `http://` and `https://` URLs are fetched over HTTP. Anything else is a
    /// local mirror.
    pub origin_url: String,

    /// Directory content is fetched into.
    pub cache_dir: PathBuf,

    /// Release version to validate.
    pub version: Option<u32>,

    /// Validate the most recent version published by the origin.
    ///
    /// Mutually exclusive with `version`.
    #[serde(default)]
    pub latest: bool,

    /// Maximum number of concurrent content fetches.
    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,

    /// Whether `rpmlib(...)` requirements are satisfied implicitly.
    #[serde(default = "default_true")]
    pub rpmlib_provided: bool,
}

impl ReleaseConfig {
    /// Parse and validate a TOML configuration.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;

        Ok(config)
    }

    /// Parse and validate a TOML configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| ReleaseError::IoPath(format!("{}", path.display()), e))?;

        Self::from_toml_str(&data)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ReleaseError::InvalidConfig("name must not be empty".into()));
        }
        if self.origin_url.is_empty() {
            return Err(ReleaseError::InvalidConfig(
                "origin_url must not be empty".into(),
            ));
        }
        if self.fetch_workers == 0 {
            return Err(ReleaseError::InvalidConfig(
                "fetch_workers must be at least 1".into(),
            ));
        }
        if self.version.is_some() && self.latest {
            return Err(ReleaseError::InvalidConfig(
                "version and latest are mutually exclusive".into(),
            ));
        }

        Ok(())
    }

    /// Metadata key of this release at a given version.
    pub fn release_key(&self, version: u32) -> ReleaseKey {
        ReleaseKey::new(&self.name, version)
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    #[test]
    fn defaults() -> Result<()> {
        let config = ReleaseConfig::from_toml_str(indoc! {r#"
            origin_url = "https://cdn.download.clearlinux.org"
            cache_dir = "/var/cache/release"
            version = 31450
        "#})?;

        assert_eq!(config.name, "clear");
        assert_eq!(config.version, Some(31450));
        assert!(!config.latest);
        assert_eq!(config.fetch_workers, 8);
        assert!(config.rpmlib_provided);
        assert_eq!(config.release_key(31450).to_string(), "clear31450");

        Ok(())
    }

    #[test]
    fn invalid() {
        assert!(matches!(
            ReleaseConfig::from_toml_str(indoc! {r#"
                origin_url = "/srv/mirror"
                cache_dir = "/tmp/cache"
                fetch_workers = 0
            "#}),
            Err(ReleaseError::InvalidConfig(_))
        ));
        assert!(matches!(
            ReleaseConfig::from_toml_str(indoc! {r#"
                origin_url = "/srv/mirror"
                cache_dir = "/tmp/cache"
                version = 10
                latest = true
            "#}),
            Err(ReleaseError::InvalidConfig(_))
        ));
        assert!(matches!(
            ReleaseConfig::from_toml_str(indoc! {r#"
                origin_url = "/srv/mirror"
                cache_dir = "/tmp/cache"
                workers = 4
            "#}),
            Err(ReleaseError::Config(_))
        ));
        assert!(matches!(
            ReleaseConfig::from_toml_str("cache_dir = \"/tmp/cache\""),
            Err(ReleaseError::Config(_))
        ));
    }

    #[test]
    fn from_path() -> Result<()> {
        let temp = crate::testutil::temp_dir();
        let path = temp.path().join("release.toml");
        std::fs::write(
            &path,
            indoc! {r#"
                name = "mymix"
                origin_url = "file:///srv/mirror"
                cache_dir = "/tmp/cache"
                latest = true
                fetch_workers = 2
                rpmlib_provided = false
            "#},
        )
        .unwrap();

        let config = ReleaseConfig::from_path(&path)?;
        assert_eq!(config.name, "mymix");
        assert!(config.latest);
        assert_eq!(config.version, None);
        assert_eq!(config.fetch_workers, 2);
        assert!(!config.rpmlib_provided);

        assert!(matches!(
            ReleaseConfig::from_path(temp.path().join("absent.toml")),
            Err(ReleaseError::IoPath(..))
        ));

        Ok(())
    }
}
