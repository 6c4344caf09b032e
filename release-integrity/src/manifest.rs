// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! swupd manifest primitives.

A release's content is described by a two-level tree of manifests. The
top-level index, the *MoM* (manifest of manifests), lists one entry per
component manifest along with the version at which that manifest last
changed. Each component manifest lists the files of the component, each
identified by a content hash and the version it last changed at.

Manifests are text documents:

```text
MANIFEST	30
version:	20
previous:	10
filecount:	2
timestamp:	1553904000
contentsize:	4096
includes:	os-core

F...	0aa1...	20	/usr/bin/foo
.d..	0000...	20	/usr/bin/bar
```

A header block of `key:\tvalue` lines is followed by a blank line and then
one tab-delimited line per entry: flags, hash, version, and name.
*/

use {
    crate::{
        catalog::ReleaseKey,
        error::{ReleaseError, Result},
        provider::MetadataProvider,
    },
    log::debug,
    std::io::{BufRead, BufReader, Read},
};

/// Name of the top-level manifest.
pub const MOM_NAME: &str = "MoM";

/// Length of a hex encoded content hash.
const HASH_LENGTH: usize = 64;

/// The type of filesystem entry a manifest line describes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileKind {
    File,
    Directory,
    Link,
    /// A component manifest (only in the MoM).
    Manifest,
    /// An iterative manifest (only in the MoM).
    IterativeManifest,
    Unset,
}

/// Lifecycle status of a manifest entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileStatus {
    Present,
    /// The entry was removed at its version. Carries no content.
    Deleted,
    /// The entry is tracked but not materialized. Carries no content.
    Ghosted,
}

/// The four-character flags field of a manifest entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileFlags {
    pub kind: FileKind,
    pub status: FileStatus,
    /// Modifier character (`C`onfig, `s`tate, `b`oot, ...), `.` if unset.
    pub modifier: char,
    /// Whether the entry is a rename target.
    pub rename: bool,
}

impl FileFlags {
    /// Flags of a present regular file.
    pub fn file() -> Self {
        Self {
            kind: FileKind::File,
            status: FileStatus::Present,
            modifier: '.',
            rename: false,
        }
    }

    /// Flags of a component reference in the MoM.
    pub fn manifest() -> Self {
        Self {
            kind: FileKind::Manifest,
            ..Self::file()
        }
    }

    /// Parse a flags field.
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        let chars = s.chars().collect::<Vec<_>>();

        if chars.len() != 4 {
            return Err(format!("flags field must be 4 characters; got {:?}", s));
        }

        let kind = match chars[0] {
            'F' => FileKind::File,
            'D' => FileKind::Directory,
            'L' => FileKind::Link,
            'M' => FileKind::Manifest,
            'I' => FileKind::IterativeManifest,
            '.' => FileKind::Unset,
            c => return Err(format!("unknown file type flag: {}", c)),
        };

        let status = match chars[1] {
            'd' => FileStatus::Deleted,
            'g' => FileStatus::Ghosted,
            '.' => FileStatus::Present,
            c => return Err(format!("unknown file status flag: {}", c)),
        };

        let rename = match chars[3] {
            'r' => true,
            '.' => false,
            c => return Err(format!("unknown rename flag: {}", c)),
        };

        Ok(Self {
            kind,
            status,
            modifier: chars[2],
            rename,
        })
    }
}

impl std::fmt::Display for FileFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            FileKind::File => 'F',
            FileKind::Directory => 'D',
            FileKind::Link => 'L',
            FileKind::Manifest => 'M',
            FileKind::IterativeManifest => 'I',
            FileKind::Unset => '.',
        };
        let status = match self.status {
            FileStatus::Present => '.',
            FileStatus::Deleted => 'd',
            FileStatus::Ghosted => 'g',
        };
        let rename = if self.rename { 'r' } else { '.' };

        write!(f, "{}{}{}{}", kind, status, self.modifier, rename)
    }
}

/// An entry in a manifest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileEntry {
    /// Path of the file, or component name for MoM entries.
    pub name: String,
    /// Hex encoded content hash.
    pub hash: String,
    /// Release version at which this entry last changed.
    pub version: u32,
    pub flags: FileFlags,
}

impl FileEntry {
    pub fn new(name: impl ToString, hash: impl ToString, version: u32, flags: FileFlags) -> Self {
        Self {
            name: name.to_string(),
            hash: hash.to_string(),
            version,
            flags,
        }
    }

    /// Whether the entry has content at its version.
    ///
    /// Deleted and ghosted entries are tombstones with no payload.
    pub fn present(&self) -> bool {
        self.flags.status == FileStatus::Present
    }

    fn parse_line(line: &str) -> std::result::Result<Self, String> {
        let fields = line.split('\t').collect::<Vec<_>>();

        if fields.len() != 4 {
            return Err(format!(
                "expected 4 tab-delimited fields; got {}",
                fields.len()
            ));
        }

        let flags = FileFlags::parse(fields[0])?;

        let hash = fields[1];
        if hash.len() != HASH_LENGTH {
            return Err(format!("hash must be {} characters: {}", HASH_LENGTH, hash));
        }
        hex::decode(hash).map_err(|e| format!("invalid hash {}: {:?}", hash, e))?;

        let version = fields[2]
            .parse::<u32>()
            .map_err(|e| format!("invalid version {}: {}", fields[2], e))?;

        if fields[3].is_empty() {
            return Err("empty entry name".to_string());
        }

        Ok(Self::new(fields[3], hash, version, flags))
    }
}

/// Header fields of a manifest.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ManifestHeader {
    /// Manifest format version.
    pub format: u32,
    pub version: u32,
    pub previous: u32,
    pub minversion: u32,
    pub filecount: u64,
    pub timestamp: u64,
    pub content_size: u64,
    /// Names of component manifests this manifest includes.
    pub includes: Vec<String>,
    /// Names of component manifests installed alongside this one.
    pub also_add: Vec<String>,
}

/// A parsed manifest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Manifest {
    pub name: String,
    pub header: ManifestHeader,
    pub files: Vec<FileEntry>,
}

impl Manifest {
    /// Construct an instance by parsing manifest text from a reader.
    ///
    /// `name` is the component name the manifest describes.
    pub fn from_reader(name: impl ToString, reader: impl Read) -> Result<Self> {
        let name = name.to_string();
        let err = |msg: String| ReleaseError::ManifestParse(format!("Manifest.{}", name), msg);

        let mut lines = BufReader::new(reader).lines().enumerate();
        let mut header = ManifestHeader::default();

        match lines.next() {
            Some((_, line)) => {
                let line = line.map_err(|e| err(format!("{:?}", e)))?;
                let format = line
                    .strip_prefix("MANIFEST\t")
                    .ok_or_else(|| err("missing MANIFEST line".to_string()))?;
                header.format = format
                    .trim()
                    .parse()
                    .map_err(|e| err(format!("invalid format {}: {}", format, e)))?;
            }
            None => return Err(err("empty manifest".to_string())),
        }

        for (number, line) in lines.by_ref() {
            let line = line.map_err(|e| err(format!("{:?}", e)))?;

            if line.is_empty() {
                break;
            }

            let (key, value) = line
                .split_once(":\t")
                .ok_or_else(|| err(format!("line {}: malformed header: {}", number + 1, line)))?;

            let invalid = |e: std::num::ParseIntError| {
                err(format!("line {}: invalid {}: {}", number + 1, key, e))
            };

            match key {
                "version" => header.version = value.trim().parse().map_err(invalid)?,
                "previous" => header.previous = value.trim().parse().map_err(invalid)?,
                "minversion" => header.minversion = value.trim().parse().map_err(invalid)?,
                "filecount" => header.filecount = value.trim().parse().map_err(invalid)?,
                "timestamp" => header.timestamp = value.trim().parse().map_err(invalid)?,
                "contentsize" => header.content_size = value.trim().parse().map_err(invalid)?,
                "includes" => header.includes.push(value.to_string()),
                "also-add" => header.also_add.push(value.to_string()),
                _ => {
                    debug!("Manifest.{}: ignoring header field {}", name, key);
                }
            }
        }

        let mut files = vec![];

        for (number, line) in lines {
            let line = line.map_err(|e| err(format!("{:?}", e)))?;

            if line.is_empty() {
                continue;
            }

            files.push(
                FileEntry::parse_line(&line)
                    .map_err(|msg| err(format!("line {}: {}", number + 1, msg)))?,
            );
        }

        if header.filecount != 0 && header.filecount != files.len() as u64 {
            return Err(err(format!(
                "header declares {} entries; found {}",
                header.filecount,
                files.len()
            )));
        }

        Ok(Self {
            name,
            header,
            files,
        })
    }

    /// Construct an instance by parsing manifest text from a string.
    pub fn from_text(name: impl ToString, s: &str) -> Result<Self> {
        Self::from_reader(name, s.as_bytes())
    }

    /// Iterate over entries that have content.
    pub fn present_files(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.iter().filter(|f| f.present())
    }
}

/// A reference from the top-level index to a component manifest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComponentRef {
    pub name: String,
    pub hash: String,
    /// Release version at which the component manifest last changed.
    pub version: u32,
}

/// The top-level manifest index of a release.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ManifestIndex {
    /// Release version the index describes.
    pub version: u32,
    pub components: Vec<ComponentRef>,
}

impl ManifestIndex {
    /// Derive an index from a parsed MoM.
    ///
    /// Only manifest entries are component references; anything else in the
    /// MoM is ignored.
    pub fn from_manifest(mom: &Manifest) -> Self {
        Self {
            version: mom.header.version,
            components: mom
                .files
                .iter()
                .filter(|f| f.flags.kind == FileKind::Manifest)
                .map(|f| ComponentRef {
                    name: f.name.clone(),
                    hash: f.hash.clone(),
                    version: f.version,
                })
                .collect(),
        }
    }

    pub fn component(&self, name: &str) -> Option<&ComponentRef> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// The full manifest tree of a release.
///
/// Component manifests are held in index order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ManifestTree {
    pub index: ManifestIndex,
    pub manifests: Vec<Manifest>,
}

impl ManifestTree {
    /// Release version of the tree.
    pub fn version(&self) -> u32 {
        self.index.version
    }

    pub fn manifest(&self, name: &str) -> Option<&Manifest> {
        self.manifests.iter().find(|m| m.name == name)
    }

    /// Assemble a tree from a metadata store.
    ///
    /// Each component is looked up at its own recorded version.
    pub fn from_provider(provider: &dyn MetadataProvider, release: &ReleaseKey) -> Result<Self> {
        let index = provider.fetch_manifest_index(release)?;

        if index.components.is_empty() {
            return Err(ReleaseError::ManifestsEmpty(release.to_string()));
        }

        let mut manifests = Vec::with_capacity(index.components.len());

        for component in &index.components {
            let files = provider
                .fetch_manifest_files(&release.at_version(component.version), &component.name)?;

            manifests.push(Manifest {
                name: component.name.clone(),
                header: ManifestHeader {
                    version: component.version,
                    filecount: files.len() as u64,
                    ..Default::default()
                },
                files,
            });
        }

        Ok(Self { index, manifests })
    }
}
