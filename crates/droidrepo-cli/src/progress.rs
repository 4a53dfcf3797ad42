use std::{
    collections::HashMap,
    sync::{mpsc::Receiver, Arc, LazyLock},
    time::Duration,
};

use droidrepo_events::{AddRepoState, LogLevel, OperationId, RepoId, SyncEvent, UpdateStage};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use nu_ansi_term::Color::{Cyan, Green, Red, Yellow};
use tracing::{debug, error, info, warn};

use crate::utils::progress_enabled;

/// Shared MultiProgress instance for suspend/stop from other modules.
static MULTI: LazyLock<Arc<MultiProgress>> = LazyLock::new(|| Arc::new(MultiProgress::new()));

/// Pause progress display, run the closure, then resume.
pub fn suspend<F: FnOnce()>(f: F) {
    MULTI.suspend(f);
}

/// Stop and clear all progress bars.
pub fn stop() {
    MULTI.clear().ok();
}

/// Owns the thread rendering events.
///
/// Drop the [`RepoManager`](droidrepo_core::RepoManager) holding the sender before calling
/// [`finish`](ProgressGuard::finish), the thread only ends once the channel closes.
pub struct ProgressGuard {
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ProgressGuard {
    pub fn finish(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

fn download_style() -> Option<ProgressStyle> {
    ProgressStyle::with_template(
        "{spinner:.cyan} {prefix}  {wide_bar:.cyan/dim}  {bytes}/{total_bytes}  {bytes_per_sec}",
    )
    .ok()
    .map(|style| style.progress_chars("━━─"))
}

fn unsized_download_style() -> Option<ProgressStyle> {
    ProgressStyle::with_template("{spinner:.cyan} {prefix}  {bytes}  {bytes_per_sec}").ok()
}

fn spinner_style() -> Option<ProgressStyle> {
    ProgressStyle::with_template("{spinner:.cyan} {msg}").ok()
}

fn new_bar(bar: ProgressBar, style: Option<ProgressStyle>) -> ProgressBar {
    let bar = if progress_enabled() {
        MULTI.add(bar)
    } else {
        MULTI.add(ProgressBar::hidden())
    };
    if let Some(style) = style {
        bar.set_style(style);
    }
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn create_spinner(message: String) -> ProgressBar {
    let bar = new_bar(ProgressBar::new_spinner(), spinner_style());
    bar.set_message(message);
    bar
}

/// Last path segment of a download URL.
fn file_label(url: &str) -> &str {
    url.rsplit('/').find(|s| !s.is_empty()).unwrap_or(url)
}

fn stage_message(label: &str, stage: &UpdateStage) -> Option<String> {
    let message = match stage {
        UpdateStage::FetchingEntry => format!("{label}: fetching entry"),
        UpdateStage::EntryVerified { timestamp } => {
            format!("{label}: verified entry {timestamp}")
        }
        UpdateStage::DownloadingDiff { name } => format!("{label}: downloading diff {name}"),
        UpdateStage::DownloadingIndex { name } => format!("{label}: downloading {name}"),
        UpdateStage::Applying => format!("{label}: writing database"),
        UpdateStage::Committed { .. } | UpdateStage::Unchanged | UpdateStage::Failed(_) => {
            return None
        }
    };
    Some(message)
}

/// Renders [`SyncEvent`]s as progress bars on a background thread.
///
/// `labels` maps repository ids to display names; unknown ids show as `#<id>`.
pub fn spawn_event_handler(
    receiver: Receiver<SyncEvent>,
    labels: HashMap<RepoId, String>,
) -> ProgressGuard {
    let handle = std::thread::spawn(move || {
        let mut downloads: HashMap<OperationId, ProgressBar> = HashMap::new();
        let mut updates: HashMap<RepoId, ProgressBar> = HashMap::new();
        let mut add_job: Option<ProgressBar> = None;

        let label = |repo_id: RepoId| {
            labels
                .get(&repo_id)
                .cloned()
                .unwrap_or_else(|| format!("#{repo_id}"))
        };

        while let Ok(event) = receiver.recv() {
            match event {
                SyncEvent::DownloadStarting { op_id, url, total } => {
                    let bar = if total > 0 {
                        new_bar(ProgressBar::new(total as u64), download_style())
                    } else {
                        new_bar(ProgressBar::new_spinner(), unsized_download_style())
                    };
                    bar.set_prefix(file_label(&url).to_string());
                    downloads.insert(op_id, bar);
                }
                SyncEvent::DownloadProgress {
                    op_id,
                    current,
                    total,
                    ..
                } => {
                    if let Some(bar) = downloads.get(&op_id) {
                        if total > 0 {
                            bar.set_length(total as u64);
                        }
                        bar.set_position(current);
                    }
                }
                SyncEvent::DownloadComplete { op_id, url, total } => {
                    if let Some(bar) = downloads.remove(&op_id) {
                        bar.finish_and_clear();
                    }
                    debug!("Downloaded {url} ({total} bytes)");
                }
                SyncEvent::MirrorFailed { url, error, .. } => {
                    warn!("Mirror {url} failed: {error}");
                }
                SyncEvent::Update { repo_id, stage } => {
                    let name = label(repo_id);
                    match stage_message(&name, &stage) {
                        Some(message) => {
                            let bar = updates
                                .entry(repo_id)
                                .or_insert_with(|| create_spinner(message.clone()));
                            bar.set_message(message);
                        }
                        None => {
                            if let Some(bar) = updates.remove(&repo_id) {
                                bar.finish_and_clear();
                            }
                            let (mark, status) = match &stage {
                                UpdateStage::Committed { .. } => (Green.paint("✓"), "updated"),
                                UpdateStage::Unchanged => (Green.paint("✓"), "up to date"),
                                _ => (Red.paint("✗"), "failed"),
                            };
                            MULTI.suspend(|| {
                                eprintln!(
                                    " {} {}: {}",
                                    mark,
                                    Cyan.paint(&name),
                                    nu_ansi_term::Style::new().dimmed().paint(status)
                                );
                            });
                        }
                    }
                }
                SyncEvent::AddRepo(state) => {
                    match state {
                        AddRepoState::Fetching {
                            url, done: false, ..
                        } => {
                            add_job = Some(create_spinner(format!("Fetching {url}")));
                        }
                        AddRepoState::Adding => {
                            if let Some(bar) = add_job.take() {
                                bar.finish_and_clear();
                            }
                            add_job = Some(create_spinner("Adding repository".to_string()));
                        }
                        AddRepoState::Fetching { done: true, .. }
                        | AddRepoState::Added { .. }
                        | AddRepoState::Error { .. } => {
                            if let Some(bar) = add_job.take() {
                                bar.finish_and_clear();
                            }
                        }
                    }
                }
                SyncEvent::Log { level, message } => {
                    match level {
                        LogLevel::Debug => debug!("{message}"),
                        LogLevel::Info => info!("{message}"),
                        LogLevel::Warning => warn!("{}", Yellow.paint(message)),
                        LogLevel::Error => error!("{message}"),
                    }
                }
            }
        }

        for bar in downloads.into_values().chain(updates.into_values()) {
            bar.finish_and_clear();
        }
        if let Some(bar) = add_job {
            bar.finish_and_clear();
        }
    });

    ProgressGuard {
        handle: Some(handle),
    }
}
