// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{
        error::Result,
        file_archive_path, manifest_archive_path,
        manifest::{FileEntry, FileFlags},
        ContentOrigin,
    },
    async_trait::async_trait,
    futures::AsyncRead,
    std::{
        path::{Path, PathBuf},
        pin::Pin,
        sync::{Arc, Mutex},
    },
};

pub fn temp_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("release-integrity-test")
        .tempdir()
        .expect("unable to create temporary directory")
}

/// Write an uncompressed tar archive holding regular files.
pub fn write_tar(path: &Path, entries: &[(&str, &[u8])]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("unable to create archive directory");
    }

    let fh = std::fs::File::create(path).expect("unable to create archive");
    let mut builder = tar::Builder::new(fh);

    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();

        builder
            .append_data(&mut header, name, *data)
            .expect("unable to append archive entry");
    }

    builder.finish().expect("unable to finish archive");
}

/// Produce a deterministic 64 character hex hash from a seed.
pub fn hash(seed: &str) -> String {
    let mut hex = seed
        .bytes()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();
    hex.truncate(64);

    format!("{:0<64}", hex)
}

/// Render manifest text.
pub fn manifest_text(version: u32, entries: &[FileEntry]) -> String {
    let mut s = format!(
        "MANIFEST\t30\nversion:\t{}\nprevious:\t0\nfilecount:\t{}\n\n",
        version,
        entries.len()
    );

    for entry in entries {
        s.push_str(&format!(
            "{}\t{}\t{}\t{}\n",
            entry.flags, entry.hash, entry.version, entry.name
        ));
    }

    s
}

/// A release mirror on the local filesystem, laid out as a content origin.
pub struct Mirror {
    pub root: PathBuf,
}

impl Mirror {
    pub fn new(root: PathBuf) -> Self {
        std::fs::create_dir_all(&root).expect("unable to create mirror directory");

        Self { root }
    }

    /// Publish the MoM for `version` referencing `(component, component version)` pairs.
    pub fn publish_mom(&self, version: u32, components: &[(&str, u32)]) {
        let entries = components
            .iter()
            .map(|(name, v)| FileEntry::new(name, hash(name), *v, FileFlags::manifest()))
            .collect::<Vec<_>>();

        self.publish_manifest(version, "MoM", &manifest_text(version, &entries));
    }

    /// Publish a component manifest archive with raw manifest text.
    pub fn publish_manifest(&self, version: u32, component: &str, text: &str) {
        write_tar(
            &self.root.join(manifest_archive_path(version, component)),
            &[(format!("Manifest.{}", component).as_str(), text.as_bytes())],
        );
    }

    /// Publish a file content archive.
    pub fn publish_file(&self, version: u32, hash: &str, data: &[u8]) {
        write_tar(
            &self.root.join(file_archive_path(version, hash)),
            &[(hash, data)],
        );
    }
}

/// A [ContentOrigin] recording every path requested from an inner origin.
pub struct RecordingOrigin<O> {
    inner: O,
    requests: Arc<Mutex<Vec<String>>>,
}

impl<O> RecordingOrigin<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            requests: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("lock poisoned").clone()
    }

    pub fn clear(&self) {
        self.requests.lock().expect("lock poisoned").clear();
    }
}

#[async_trait]
impl<O: ContentOrigin + Send> ContentOrigin for RecordingOrigin<O> {
    fn url(&self) -> Result<url::Url> {
        self.inner.url()
    }

    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        self.requests
            .lock()
            .expect("lock poisoned")
            .push(path.to_string());

        self.inner.get_path(path).await
    }
}
