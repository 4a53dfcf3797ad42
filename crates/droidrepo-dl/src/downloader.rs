use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use sha2::{Digest, Sha256};
use tracing::{debug, info};
use url::Url;

use crate::{
    chooser::{mirror_request, MirrorChooser},
    error::{DownloadError, Result},
    http::{Credentials, Http},
    mirror::DownloadRequest,
};

const BUFFER_SIZE: usize = 8192;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Receives `(bytes_so_far, total)`; `total` is -1 when unknown.
pub type ProgressListener = Arc<dyn Fn(u64, i64) + Send + Sync>;

/// Cooperative cancellation shared between a download and whoever may cancel it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails with [`DownloadError::Interrupted`] once cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            info!("Received interrupt, cancelling download");
            return Err(DownloadError::Interrupted);
        }
        Ok(())
    }
}

/// Fetches one file into a destination path.
pub trait Downloader: Send {
    /// Downloads the file, verifying `sha256` when given.
    ///
    /// `total_size` is the size announced by the index or -1. It is only used for progress.
    fn download(&mut self, total_size: i64, sha256: Option<&str>) -> Result<()>;

    fn set_progress_listener(&mut self, listener: ProgressListener);

    fn cancel_flag(&self) -> CancelFlag;
}

/// Creates downloaders for a request and a caller-owned destination file.
pub trait DownloaderFactory: Send + Sync {
    /// The returned downloader stops with [`DownloadError::Interrupted`] once `cancel` is set.
    fn create(
        &self,
        request: DownloadRequest,
        dest: &Path,
        cancel: CancelFlag,
    ) -> Box<dyn Downloader>;
}

/// Streams files over HTTP(S), or from `file:` URLs, trying mirrors in turn.
pub struct HttpDownloader {
    chooser: Arc<dyn MirrorChooser>,
    request: DownloadRequest,
    dest: PathBuf,
    cancel: CancelFlag,
    listener: Option<ProgressListener>,
}

impl HttpDownloader {
    pub fn new(
        chooser: Arc<dyn MirrorChooser>,
        request: DownloadRequest,
        dest: impl Into<PathBuf>,
    ) -> Self {
        Self {
            chooser,
            request,
            dest: dest.into(),
            cancel: CancelFlag::new(),
            listener: None,
        }
    }

    /// Shares `cancel` with the caller so one flag can stop several downloads.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    fn credentials(&self) -> Option<Credentials<'_>> {
        match (&self.request.username, &self.request.password) {
            (Some(username), Some(password)) => {
                Some(Credentials {
                    username,
                    password,
                })
            }
            _ => None,
        }
    }

    /// Opens `url`, returning the body and the number of bytes it will deliver if known.
    fn open(&self, url: &str, resume_from: Option<u64>) -> Result<(Box<dyn Read>, Option<u64>)> {
        if url.starts_with("file:") {
            return open_local(url, resume_from);
        }

        let resp = Http::fetch(url, resume_from, self.credentials())?;
        if resume_from.is_some() && resp.status() != 206 {
            return Err(DownloadError::NoResume {
                url: url.to_string(),
            });
        }
        let length = Http::content_length(&resp);
        Ok((Box::new(resp.into_body().into_reader()), length))
    }

    fn download_from(&self, url: &str, total_size: i64, sha256: Option<&str>) -> Result<()> {
        debug!("Downloading {} to {}", url, self.dest.display());
        self.cancel.check()?;

        let existing = fs::metadata(&self.dest).map(|m| m.len()).unwrap_or(0);
        let resume_from =
            (existing > 0 && total_size > 0 && (existing as i64) < total_size).then_some(existing);

        // opening the connection is the slow part, so check again afterwards
        let (mut reader, length) = self.open(url, resume_from)?;
        self.cancel.check()?;

        let mut hasher = Sha256::new();
        let mut file = match resume_from {
            Some(_) => {
                hash_existing(&self.dest, &mut hasher)?;
                OpenOptions::new().append(true).open(&self.dest)?
            }
            None => File::create(&self.dest)?,
        };

        let mut copied = resume_from.unwrap_or(0);
        let total = if total_size >= 0 {
            total_size
        } else {
            length.map_or(-1, |len| (len + copied) as i64)
        };

        let mut last_report: Option<Instant> = None;
        let mut buffer = [0u8; BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            self.cancel.check()?;
            file.write_all(&buffer[..n])?;
            hasher.update(&buffer[..n]);
            copied += n as u64;
            self.report(&mut last_report, copied, total, false);
        }
        file.flush()?;

        if let Some(expected) = sha256 {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                // a later mirror must not resume on top of rejected bytes
                drop(file);
                discard(&self.dest)?;
                return Err(DownloadError::HashMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        self.report(&mut last_report, copied, total, true);
        self.cancel.check()
    }

    fn report(&self, last: &mut Option<Instant>, copied: u64, total: i64, force: bool) {
        let Some(listener) = &self.listener else {
            return;
        };
        let now = Instant::now();
        let due = last.map_or(true, |at| now.duration_since(at) > PROGRESS_INTERVAL);
        if force || due {
            listener(copied, total);
            *last = Some(now);
        }
    }
}

impl Downloader for HttpDownloader {
    fn download(&mut self, total_size: i64, sha256: Option<&str>) -> Result<()> {
        let this = &*self;
        mirror_request(this.chooser.as_ref(), &this.request, |_, url| {
            this.download_from(url, total_size, sha256)
        })
    }

    fn set_progress_listener(&mut self, listener: ProgressListener) {
        self.listener = Some(listener);
    }

    fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}

fn open_local(url: &str, resume_from: Option<u64>) -> Result<(Box<dyn Read>, Option<u64>)> {
    let path = Url::parse(url)
        .ok()
        .and_then(|u| u.to_file_path().ok())
        .ok_or_else(|| {
            DownloadError::InvalidUrl {
                url: url.to_string(),
            }
        })?;

    let mut file = File::open(&path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            DownloadError::NotFound {
                url: url.to_string(),
            }
        } else {
            DownloadError::Io(err)
        }
    })?;
    let len = file.metadata()?.len();

    if let Some(pos) = resume_from {
        file.seek(SeekFrom::Start(pos))?;
    }
    let remaining = len.saturating_sub(resume_from.unwrap_or(0));
    Ok((Box::new(file), Some(remaining)))
}

fn discard(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
        _ => Ok(()),
    }
}

fn hash_existing(path: &Path, hasher: &mut Sha256) -> Result<()> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            return Ok(());
        }
        hasher.update(&buffer[..n]);
    }
}

/// Builds [`HttpDownloader`]s sharing one mirror chooser.
pub struct HttpDownloaderFactory {
    chooser: Arc<dyn MirrorChooser>,
}

impl HttpDownloaderFactory {
    pub fn new(chooser: Arc<dyn MirrorChooser>) -> Self {
        Self {
            chooser,
        }
    }
}

impl DownloaderFactory for HttpDownloaderFactory {
    fn create(
        &self,
        request: DownloadRequest,
        dest: &Path,
        cancel: CancelFlag,
    ) -> Box<dyn Downloader> {
        Box::new(HttpDownloader::new(self.chooser.clone(), request, dest).with_cancel_flag(cancel))
    }
}
