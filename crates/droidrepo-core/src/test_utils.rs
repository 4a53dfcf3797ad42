use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use droidrepo_dl::{
    chooser::{mirror_request, MirrorChooser},
    downloader::{CancelFlag, Downloader, DownloaderFactory, ProgressListener},
    error::{DownloadError, Result},
    mirror::{DownloadRequest, Mirror},
};
use droidrepo_index::{
    entry::{ENTRY_JAR, ENTRY_JSON},
    jar::JarSigner,
};
use droidrepo_utils::hash::sha256_hex;
use serde_json::{json, Value};

/// Serves prepared bytes by URL, standing in for every mirror of every repository.
///
/// Mirrors are tried in the order of the request, the way a real download walks them.
#[derive(Default)]
pub struct FakeDownloaderFactory {
    files: Mutex<HashMap<String, Vec<u8>>>,
    requested: Mutex<Vec<String>>,
    attempted: Arc<Mutex<Vec<String>>>,
    cancel_after: Mutex<Option<String>>,
}

impl FakeDownloaderFactory {
    pub fn serve(&self, base_url: &str, name: &str, bytes: Vec<u8>) {
        let url = Mirror::new(base_url).get_url(name);
        self.files.lock().unwrap().insert(url, bytes);
    }

    /// File names requested so far, without the leading slash.
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    /// Every URL a downloader tried, in order.
    pub fn attempted(&self) -> Vec<String> {
        self.attempted.lock().unwrap().clone()
    }

    /// Raises the shared cancel flag once the file called `name` has been written.
    pub fn cancel_after(&self, name: &str) {
        *self.cancel_after.lock().unwrap() = Some(name.trim_start_matches('/').to_string());
    }
}

impl DownloaderFactory for FakeDownloaderFactory {
    fn create(
        &self,
        request: DownloadRequest,
        dest: &Path,
        cancel: CancelFlag,
    ) -> Box<dyn Downloader> {
        let name = request.index_file.name.trim_start_matches('/').to_string();
        self.requested.lock().unwrap().push(name.clone());

        let cancel_when_done = self.cancel_after.lock().unwrap().as_deref() == Some(name.as_str());
        Box::new(FakeDownloader {
            request,
            files: self.files.lock().unwrap().clone(),
            attempted: self.attempted.clone(),
            dest: dest.to_path_buf(),
            cancel,
            cancel_when_done,
            listener: None,
        })
    }
}

struct InOrder;

impl MirrorChooser for InOrder {
    fn order_mirrors(&self, request: &DownloadRequest) -> Vec<Mirror> {
        request.mirrors.clone()
    }
}

struct FakeDownloader {
    request: DownloadRequest,
    files: HashMap<String, Vec<u8>>,
    attempted: Arc<Mutex<Vec<String>>>,
    dest: PathBuf,
    cancel: CancelFlag,
    cancel_when_done: bool,
    listener: Option<ProgressListener>,
}

impl FakeDownloader {
    fn fetch(&self, url: &str, sha256: Option<&str>) -> Result<()> {
        self.cancel.check()?;
        self.attempted.lock().unwrap().push(url.to_string());

        let Some(bytes) = self.files.get(url) else {
            return Err(DownloadError::NotFound {
                url: url.to_string(),
            });
        };
        fs::write(&self.dest, bytes)?;
        if let Some(listener) = &self.listener {
            listener(bytes.len() as u64, bytes.len() as i64);
        }
        if let Some(expected) = sha256 {
            let actual = sha256_hex(bytes);
            if actual != expected {
                return Err(DownloadError::HashMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        if self.cancel_when_done {
            self.cancel.cancel();
        }
        Ok(())
    }
}

impl Downloader for FakeDownloader {
    fn download(&mut self, _total_size: i64, sha256: Option<&str>) -> Result<()> {
        let this = &*self;
        mirror_request(&InOrder, &this.request, |_, url| this.fetch(url, sha256))
    }

    fn set_progress_listener(&mut self, listener: ProgressListener) {
        self.listener = Some(listener);
    }

    fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}

/// Entry metadata for `bytes` published under `name`.
pub fn file_entry(name: &str, bytes: &[u8]) -> Value {
    json!({
        "name": name,
        "sha256": sha256_hex(bytes),
        "size": bytes.len(),
        "numPackages": 1,
    })
}

/// Publishes a signed entry and the full v2 index at `base_url`.
pub fn publish_v2(
    factory: &FakeDownloaderFactory,
    signer: &JarSigner,
    base_url: &str,
    timestamp: i64,
    index: &Value,
) {
    let index_bytes = serde_json::to_vec(index).unwrap();
    let entry = json!({
        "timestamp": timestamp,
        "version": 20002,
        "index": file_entry("/index-v2.json", &index_bytes),
        "diffs": {},
    });
    factory.serve(base_url, "/index-v2.json", index_bytes);

    let entry_bytes = serde_json::to_vec(&entry).unwrap();
    let jar = signer
        .sign(&[(ENTRY_JSON, entry_bytes.as_slice())])
        .unwrap();
    factory.serve(base_url, ENTRY_JAR, jar);
}

/// A minimal v2 index with one app.
pub fn minimal_index(address: &str, name: &str, timestamp: i64) -> Value {
    json!({
        "repo": {
            "name": { "en-US": name },
            "address": address,
            "timestamp": timestamp,
            "mirrors": [{ "url": "https://mirror.example.org/fdroid/repo" }],
        },
        "packages": {
            "org.example.app": {
                "metadata": {
                    "name": { "en-US": "Example" },
                    "added": 1000,
                    "lastUpdated": 2000,
                },
                "versions": {},
            },
        },
    })
}
