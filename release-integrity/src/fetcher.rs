// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Concurrent materialization of file content.

Every present entry in a [ManifestTree] names a content archive at
`update/{version}/files/{hash}.tar`. [ContentFetcher] downloads and extracts
these archives into a cache directory with bounded concurrency.

Individual fetch failures do not abort the run. They are collected into a
[FetchReport] for the caller to inspect.
*/

use {
    crate::{
        archive::extract_archive_blocking,
        error::{ReleaseError, Result},
        file_archive_cache_path, file_archive_path,
        manifest::ManifestTree,
        ContentOrigin, DEFAULT_FETCH_WORKERS,
    },
    futures::StreamExt,
    log::{debug, info, warn},
    std::{
        collections::BTreeMap,
        path::{Path, PathBuf},
    },
    tokio_util::sync::CancellationToken,
};

/// A single file content archive to materialize.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileJob {
    /// Origin relative path of the archive.
    pub remote_path: String,
    /// Local path the archive is downloaded to. Ends in `.tar`.
    pub output_path: PathBuf,
    pub version: u32,
    pub hash: String,
}

impl FileJob {
    pub fn new(cache_root: &Path, version: u32, hash: &str) -> Self {
        Self {
            remote_path: file_archive_path(version, hash),
            output_path: file_archive_cache_path(cache_root, version, hash),
            version,
            hash: hash.to_string(),
        }
    }

    /// Path of the extracted content.
    ///
    /// Its presence marks the job as complete.
    pub fn extracted_path(&self) -> PathBuf {
        self.output_path.with_extension("")
    }
}

/// Lifecycle of a [FileJob].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobState {
    Pending,
    Downloading,
    Extracting,
    Done,
    Failed,
    Cancelled,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Describes an event during content fetching.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FetchEvent {
    /// Total number of unique file archives referenced.
    JobsResolved(usize),

    /// Content at the given path is already extracted.
    JobCached(String),

    /// The job for the given path entered a new state.
    JobState(String, JobState),

    /// An archive at the given path of the given size was downloaded.
    Downloaded(String, u64),

    /// All jobs have finished.
    Finished,
}

impl std::fmt::Display for FetchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::JobsResolved(count) => {
                write!(f, "resolved {} file archives", count)
            }
            Self::JobCached(path) => {
                write!(f, "{} is cached", path)
            }
            Self::JobState(path, state) => {
                write!(f, "{}: {}", path, state)
            }
            Self::Downloaded(path, size) => {
                write!(f, "downloaded {} bytes from {}", size, path)
            }
            Self::Finished => f.write_str("fetch finished"),
        }
    }
}

/// Outcome of a content fetch run.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Jobs whose content was downloaded and extracted.
    pub fetched: Vec<FileJob>,
    /// Jobs whose content was already present.
    pub cached: Vec<FileJob>,
    /// Jobs that failed, with their error.
    pub failures: Vec<(FileJob, ReleaseError)>,
    /// Jobs abandoned because the run was cancelled.
    pub cancelled: Vec<FileJob>,
}

impl FetchReport {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Total number of jobs accounted for.
    pub fn job_count(&self) -> usize {
        self.fetched.len() + self.cached.len() + self.failures.len() + self.cancelled.len()
    }

    /// Whether every job's content is now present.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.cancelled.is_empty()
    }
}

/// Collect the unique file archives referenced by present manifest entries.
///
/// Entries sharing a hash and version across components resolve to one job.
pub fn collect_file_jobs(tree: &ManifestTree, cache_root: &Path) -> BTreeMap<PathBuf, FileJob> {
    let mut jobs = BTreeMap::new();

    for manifest in &tree.manifests {
        for entry in manifest.present_files() {
            let job = FileJob::new(cache_root, entry.version, &entry.hash);

            jobs.entry(job.output_path.clone()).or_insert(job);
        }
    }

    jobs
}

enum JobOutcome {
    Fetched(u64),
    Cached,
    Cancelled,
}

fn remove_archive(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("unable to remove {}: {:?}", path.display(), e);
        }
    }
}

/// Downloads and extracts file content from a [ContentOrigin].
pub struct ContentFetcher<'origin> {
    origin: &'origin dyn ContentOrigin,
    cache_root: PathBuf,
    workers: usize,
    cancel: CancellationToken,
}

impl<'origin> ContentFetcher<'origin> {
    pub fn new(origin: &'origin dyn ContentOrigin, cache_root: impl AsRef<Path>) -> Self {
        Self {
            origin,
            cache_root: cache_root.as_ref().to_path_buf(),
            workers: DEFAULT_FETCH_WORKERS,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Set the maximum number of concurrent fetches.
    ///
    /// Values below 1 are treated as 1.
    pub fn set_workers(&mut self, workers: usize) {
        self.workers = workers.max(1);
    }

    /// Token that cancels in-flight and pending fetches when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn set_cancellation_token(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    async fn run_job(
        &self,
        job: &FileJob,
        progress_cb: &Option<Box<dyn Fn(FetchEvent) + Sync>>,
    ) -> Result<JobOutcome> {
        if std::fs::symlink_metadata(job.extracted_path()).is_ok() {
            return Ok(JobOutcome::Cached);
        }

        if self.cancel.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }

        if let Some(cb) = progress_cb {
            cb(FetchEvent::JobState(
                job.remote_path.clone(),
                JobState::Downloading,
            ));
        }

        let res = tokio::select! {
            res = self.origin.download_to_path(&job.remote_path, &job.output_path) => res,
            _ = self.cancel.cancelled() => {
                remove_archive(&job.output_path);
                return Ok(JobOutcome::Cancelled);
            }
        };

        let res = async {
            let size = res?;

            if let Some(cb) = progress_cb {
                cb(FetchEvent::Downloaded(job.remote_path.clone(), size));
            }

            if self.cancel.is_cancelled() {
                return Ok(JobOutcome::Cancelled);
            }

            if let Some(cb) = progress_cb {
                cb(FetchEvent::JobState(
                    job.remote_path.clone(),
                    JobState::Extracting,
                ));
            }

            let dest_dir = job
                .output_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| self.cache_root.clone());

            extract_archive_blocking(job.output_path.clone(), dest_dir).await?;

            if std::fs::symlink_metadata(job.extracted_path()).is_err() {
                return Err(ReleaseError::Extract(
                    job.remote_path.clone(),
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("archive does not contain {}", job.hash),
                    ),
                ));
            }

            Ok(JobOutcome::Fetched(size))
        }
        .await;

        remove_archive(&job.output_path);

        res
    }

    /// Materialize the content of every present entry in a manifest tree.
    ///
    /// Content already extracted in the cache is skipped. Up to the configured
    /// number of workers fetch concurrently. Failures of individual jobs are
    /// recorded in the returned report and do not stop other jobs.
    pub async fn fetch_all(
        &self,
        tree: &ManifestTree,
        progress_cb: &Option<Box<dyn Fn(FetchEvent) + Sync>>,
    ) -> Result<FetchReport> {
        std::fs::create_dir_all(&self.cache_root)
            .map_err(|e| ReleaseError::IoPath(format!("{}", self.cache_root.display()), e))?;

        let jobs = collect_file_jobs(tree, &self.cache_root);
        let total = jobs.len();

        if let Some(cb) = progress_cb {
            cb(FetchEvent::JobsResolved(total));
        }
        info!(
            "fetching content of {} files for version {} with {} workers",
            total,
            tree.version(),
            self.workers
        );

        let fs = jobs
            .into_values()
            .map(|job| async move {
                let res = self.run_job(&job, progress_cb).await;
                (job, res)
            })
            .collect::<Vec<_>>();

        let mut buffered = futures::stream::iter(fs).buffer_unordered(self.workers);
        let mut report = FetchReport::default();

        while let Some((job, res)) = buffered.next().await {
            match res {
                Ok(JobOutcome::Fetched(size)) => {
                    debug!("fetched {} ({} bytes)", job.remote_path, size);
                    if let Some(cb) = progress_cb {
                        cb(FetchEvent::JobState(job.remote_path.clone(), JobState::Done));
                    }
                    report.fetched.push(job);
                }
                Ok(JobOutcome::Cached) => {
                    if let Some(cb) = progress_cb {
                        cb(FetchEvent::JobCached(job.remote_path.clone()));
                    }
                    report.cached.push(job);
                }
                Ok(JobOutcome::Cancelled) => {
                    if let Some(cb) = progress_cb {
                        cb(FetchEvent::JobState(
                            job.remote_path.clone(),
                            JobState::Cancelled,
                        ));
                    }
                    report.cancelled.push(job);
                }
                Err(e) => {
                    warn!("failed to fetch {}: {}", job.remote_path, e);
                    if let Some(cb) = progress_cb {
                        cb(FetchEvent::JobState(job.remote_path.clone(), JobState::Failed));
                    }
                    report.failures.push((job, e));
                }
            }
        }

        if let Some(cb) = progress_cb {
            cb(FetchEvent::Finished);
        }

        if !report.failures.is_empty() {
            warn!("{} of {} file fetches failed", report.failure_count(), total);
        }
        if !report.cancelled.is_empty() {
            warn!("{} of {} file fetches cancelled", report.cancelled.len(), total);
        }
        info!(
            "{} files fetched; {} already cached",
            report.fetched.len(),
            report.cached.len()
        );

        Ok(report)
    }
}
