use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

/// Success and error counters of one mirror.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorData {
    pub successes: i32,
    pub errors: i32,
}

impl MirrorData {
    /// Reads counters from a `"successes,errors"` string.
    ///
    /// Malformed input leaves the current values untouched.
    pub fn update_from_str(&mut self, value: &str) {
        let Some((successes, errors)) = value.split_once(',') else {
            return;
        };
        if let (Ok(successes), Ok(errors)) = (
            successes.trim().parse::<i32>(),
            errors.trim().parse::<i32>(),
        ) {
            self.successes = successes;
            self.errors = errors;
        }
    }

    pub fn score(&self) -> i64 {
        i64::from(self.successes) - i64::from(self.errors)
    }
}

impl fmt::Display for MirrorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.successes, self.errors)
    }
}

/// Storage for per-mirror statistics and the location preferences used to order mirrors.
pub trait MirrorParameterManager: Send + Sync {
    fn increment_mirror_success_count(&self, mirror_url: &str);
    fn set_mirror_success_count(&self, mirror_url: &str, count: i32);
    fn get_mirror_success_count(&self, mirror_url: &str) -> i32;

    fn increment_mirror_error_count(&self, mirror_url: &str);
    fn set_mirror_error_count(&self, mirror_url: &str, count: i32);
    fn get_mirror_error_count(&self, mirror_url: &str) -> i32;

    /// Mirrors located in [`current_locations`](Self::current_locations) go first.
    fn prefer_regional_mirrors(&self) -> bool;
    /// Mirrors outside the current locations go first.
    fn prefer_worldwide_mirrors(&self) -> bool;
    fn current_locations(&self) -> Vec<String>;
}

/// Location preferences shared by the parameter managers.
#[derive(Debug, Clone, Default)]
pub struct LocationPreferences {
    pub prefer_regional: bool,
    pub prefer_worldwide: bool,
    pub current_locations: Vec<String>,
}

/// Keeps mirror statistics in a TOML file of `url = "successes,errors"` entries.
///
/// Every change is written back immediately; write failures are logged and otherwise ignored.
pub struct FileMirrorParameterManager {
    path: Option<PathBuf>,
    data: Mutex<BTreeMap<String, MirrorData>>,
    preferences: LocationPreferences,
}

impl FileMirrorParameterManager {
    /// Loads statistics from `path`. A missing or unreadable file starts empty.
    pub fn load(path: impl AsRef<Path>, preferences: LocationPreferences) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = match fs::read_to_string(&path) {
            Ok(content) => parse_stats(&content),
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read mirror stats {}: {}", path.display(), err);
                }
                BTreeMap::new()
            }
        };

        Self {
            path: Some(path),
            data: Mutex::new(data),
            preferences,
        }
    }

    /// Statistics kept only for the lifetime of the process.
    pub fn in_memory(preferences: LocationPreferences) -> Self {
        Self {
            path: None,
            data: Mutex::new(BTreeMap::new()),
            preferences,
        }
    }

    fn update<F>(&self, mirror_url: &str, f: F)
    where
        F: FnOnce(&mut MirrorData),
    {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        f(data.entry(mirror_url.to_string()).or_default());
        self.persist(&data);
    }

    fn get(&self, mirror_url: &str) -> MirrorData {
        self.data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(mirror_url)
            .copied()
            .unwrap_or_default()
    }

    fn persist(&self, data: &BTreeMap<String, MirrorData>) {
        let Some(path) = &self.path else {
            return;
        };

        let table: BTreeMap<&str, String> = data
            .iter()
            .map(|(url, stats)| (url.as_str(), stats.to_string()))
            .collect();

        let result = toml::to_string(&table)
            .map_err(|err| err.to_string())
            .and_then(|content| {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|err| err.to_string())?;
                }
                fs::write(path, content).map_err(|err| err.to_string())
            });

        match result {
            Ok(()) => debug!("Saved mirror stats to {}", path.display()),
            Err(err) => warn!("Failed to save mirror stats {}: {}", path.display(), err),
        }
    }
}

fn parse_stats(content: &str) -> BTreeMap<String, MirrorData> {
    let table: BTreeMap<String, String> = match toml::from_str(content) {
        Ok(table) => table,
        Err(err) => {
            warn!("Ignoring malformed mirror stats: {}", err);
            return BTreeMap::new();
        }
    };

    table
        .into_iter()
        .map(|(url, value)| {
            let mut stats = MirrorData::default();
            stats.update_from_str(&value);
            (url, stats)
        })
        .collect()
}

impl MirrorParameterManager for FileMirrorParameterManager {
    fn increment_mirror_success_count(&self, mirror_url: &str) {
        self.update(mirror_url, |stats| stats.successes = stats.successes.saturating_add(1));
    }

    fn set_mirror_success_count(&self, mirror_url: &str, count: i32) {
        self.update(mirror_url, |stats| stats.successes = count);
    }

    fn get_mirror_success_count(&self, mirror_url: &str) -> i32 {
        self.get(mirror_url).successes
    }

    fn increment_mirror_error_count(&self, mirror_url: &str) {
        self.update(mirror_url, |stats| stats.errors = stats.errors.saturating_add(1));
    }

    fn set_mirror_error_count(&self, mirror_url: &str, count: i32) {
        self.update(mirror_url, |stats| stats.errors = count);
    }

    fn get_mirror_error_count(&self, mirror_url: &str) -> i32 {
        self.get(mirror_url).errors
    }

    fn prefer_regional_mirrors(&self) -> bool {
        self.preferences.prefer_regional
    }

    fn prefer_worldwide_mirrors(&self) -> bool {
        self.preferences.prefer_worldwide
    }

    fn current_locations(&self) -> Vec<String> {
        self.preferences.current_locations.clone()
    }
}
