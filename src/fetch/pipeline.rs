use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded};
use tracing::{debug, error, info, warn};

use crate::audio::FileUrlData;
use crate::error::{DownloadFailure, FetchCause, FetchError};
use crate::fetch::HttpClient;

/// Retrieves the bytes of one audio file.
pub trait FileGetter: Send + Sync {
    fn get_file(&self, file: &FileUrlData) -> Result<Vec<u8>, FetchError>;
}

/// Reads local files from disk and downloads remote ones.
#[derive(Clone)]
pub struct SourceFileGetter {
    http: HttpClient,
    timeout: Duration,
}

impl SourceFileGetter {
    pub fn new(http: HttpClient, timeout: Duration) -> Self {
        Self { http, timeout }
    }
}

impl FileGetter for SourceFileGetter {
    fn get_file(&self, file: &FileUrlData) -> Result<Vec<u8>, FetchError> {
        if file.is_remote() {
            return Ok(self.http.get_with_retry(&file.url, self.timeout)?.bytes);
        }
        fs::read(&file.url).map_err(|e| {
            FetchError::new(
                file.url.clone(),
                format!("{} couldn't be read: {}", file.url, e),
                FetchCause::Io(e.to_string()),
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedData {
    pub file: FileUrlData,
    pub data: Vec<u8>,
}

impl DownloadedData {
    pub fn desired_filename(&self) -> &str {
        &self.file.desired_filename
    }
}

#[derive(Debug, Default)]
pub struct FileSaveResults {
    pub successes: Vec<DownloadedData>,
    pub fails: Vec<DownloadFailure>,
}

/// Files that are not in `media_dir` yet.
pub fn only_missing(files: &[FileUrlData], media_dir: &Path) -> Vec<FileUrlData> {
    files
        .iter()
        .filter(|file| !media_dir.join(&file.desired_filename).exists())
        .cloned()
        .collect()
}

/// Downloads every file on a pool of worker threads.
///
/// Results arrive in completion order. A failed file never stops the rest
/// of the batch.
pub fn download_all(
    getter: Arc<dyn FileGetter>,
    files: Vec<FileUrlData>,
) -> Vec<Result<DownloadedData, DownloadFailure>> {
    if files.is_empty() {
        return Vec::new();
    }

    let num_workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(files.len())
        .max(1);
    let total = files.len();

    let (job_tx, job_rx) = bounded::<FileUrlData>(total);
    let (result_tx, result_rx) = unbounded::<Result<DownloadedData, DownloadFailure>>();

    let mut handles = Vec::with_capacity(num_workers);
    for i in 0..num_workers {
        let rx = job_rx.clone();
        let tx = result_tx.clone();
        let getter = getter.clone();
        let spawned = thread::Builder::new()
            .name(format!("download-{}", i))
            .spawn(move || {
                debug!("Download worker {} started", i);
                for file in rx {
                    let outcome = match getter.get_file(&file) {
                        Ok(data) => Ok(DownloadedData { file, data }),
                        Err(error) => {
                            warn!(
                                "{} download failed: {}",
                                file.desired_filename,
                                error.describe_short()
                            );
                            Err(DownloadFailure { file, error })
                        }
                    };
                    if tx.send(outcome).is_err() {
                        break;
                    }
                }
                debug!("Download worker {} finished", i);
            });
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => error!("Failed to start download worker {}: {}", i, e),
        }
    }
    drop(job_rx);
    drop(result_tx);

    if handles.is_empty() {
        return files
            .into_iter()
            .map(|file| {
                let error = FetchError::new(
                    file.url.clone(),
                    "no download worker could be started",
                    FetchCause::Io("thread spawn failed".to_string()),
                );
                Err(DownloadFailure { file, error })
            })
            .collect();
    }

    for file in files {
        // Capacity equals the batch size, so this never blocks.
        if job_tx.send(file).is_err() {
            break;
        }
    }
    drop(job_tx);

    let results: Vec<_> = result_rx.iter().collect();
    for handle in handles {
        if handle.join().is_err() {
            error!("A download worker panicked");
        }
    }
    info!("Downloaded {} of {} files", results.iter().filter(|r| r.is_ok()).count(), total);
    results
}

/// Writes successful downloads to `media_dir` and splits the batch into
/// successes and failures.
pub fn save_files(
    results: Vec<Result<DownloadedData, DownloadFailure>>,
    media_dir: &Path,
) -> FileSaveResults {
    let mut saved = FileSaveResults::default();
    for result in results {
        match result {
            Ok(downloaded) => {
                let path = media_dir.join(downloaded.desired_filename());
                match fs::write(&path, &downloaded.data) {
                    Ok(()) => saved.successes.push(downloaded),
                    Err(e) => {
                        error!("Failed to write {:?}: {}", path, e);
                        let error = FetchError::new(
                            path.to_string_lossy(),
                            format!("{:?} couldn't be written: {}", path, e),
                            FetchCause::Io(e.to_string()),
                        );
                        saved.fails.push(DownloadFailure {
                            file: downloaded.file,
                            error,
                        });
                    }
                }
            }
            Err(failure) => saved.fails.push(failure),
        }
    }
    saved
}
