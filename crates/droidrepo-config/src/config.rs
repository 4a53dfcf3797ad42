use std::{
    collections::HashSet,
    fs,
    path::PathBuf,
    sync::{LazyLock, RwLock},
};

use documented::{Documented, DocumentedFields};
use droidrepo_utils::{
    path::{resolve_path, xdg_config_home, xdg_data_home},
    time::parse_duration,
};
use serde::{Deserialize, Serialize};
use toml_edit::DocumentMut;
use tracing::info;

use crate::{
    annotations::{annotate_toml_array_of_tables, annotate_toml_table},
    error::{ConfigError, Result},
    repository::{default_repositories, RepositoryConfig},
};

/// Strategy used to order the mirrors of a repository before downloading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorChooserKind {
    /// Shuffle mirrors on every request.
    #[default]
    Random,
    /// Prefer mirrors with the best success/error history.
    Weighted,
    /// Like `weighted`, but group mirrors by location first.
    Location,
}

/// Application's configuration
#[derive(Clone, Debug, Deserialize, Serialize, Documented, DocumentedFields)]
pub struct Config {
    /// Path to the SQLite database holding repositories and apps.
    /// Default: $DROIDREPO_ROOT/db/droidrepo.db
    pub db_path: Option<String>,

    /// Directory for temporary downloads and mirror statistics.
    /// Default: $DROIDREPO_ROOT/cache
    pub cache_path: Option<String>,

    /// Preferred locales, most preferred first. Used to pick app names and summaries.
    /// Default: ["en-US"]
    pub locales: Option<Vec<String>>,

    /// How mirrors are ordered: "random", "weighted" or "location".
    /// Default: "random"
    pub mirror_chooser: Option<MirrorChooserKind>,

    /// Try mirrors located in `current_locations` before worldwide ones.
    /// Default: false
    pub prefer_regional_mirrors: Option<bool>,

    /// Try worldwide mirrors before regional ones.
    /// Default: false
    pub prefer_worldwide_mirrors: Option<bool>,

    /// Location tags (e.g. country codes) considered regional.
    pub current_locations: Option<Vec<String>>,

    /// Proxy URL for all requests, e.g. socks5://127.0.0.1:9050
    /// Onion mirrors are only used when a proxy is set.
    pub proxy: Option<String>,

    /// User agent sent with every request.
    /// Default: droidrepo/<version>
    pub user_agent: Option<String>,

    /// Network timeout in seconds.
    /// Default: 30
    pub timeout_secs: Option<u64>,

    /// Minimum time between two updates of the same repository (e.g. "1h", "12h", "1d").
    /// "always" updates on every run.
    /// Default: "3h"
    pub update_interval: Option<String>,

    /// Android SDK level used for compatibility checks.
    /// Default: 34
    pub sdk_level: Option<i32>,

    /// Supported native ABIs, most preferred first.
    /// Default: derived from the host architecture
    pub supported_abis: Option<Vec<String>>,

    /// Hardware/software features the device provides.
    pub device_features: Option<Vec<String>>,

    /// Allow adding repositories that are not part of the configuration.
    /// Default: true
    pub allow_unknown_sources: Option<bool>,

    /// Repositories inserted into an empty database.
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

pub static CONFIG: LazyLock<RwLock<Option<Config>>> = LazyLock::new(|| RwLock::new(None));

pub static CONFIG_PATH: LazyLock<RwLock<PathBuf>> = LazyLock::new(|| {
    RwLock::new(match std::env::var("DROIDREPO_CONFIG") {
        Ok(path) => PathBuf::from(path),
        Err(_) => xdg_config_home().join("droidrepo").join("config.toml"),
    })
});

/// Loads the configuration file into the global slot.
pub fn init() -> Result<()> {
    let config = Config::new()?;
    *CONFIG.write().unwrap_or_else(|e| e.into_inner()) = Some(config);
    Ok(())
}

/// Returns a copy of the global configuration, falling back to the defaults when `init` has not
/// been called.
pub fn get_config() -> Config {
    {
        let guard = CONFIG.read().unwrap_or_else(|e| e.into_inner());
        if let Some(config) = guard.as_ref() {
            return config.clone();
        }
    }

    let mut guard = CONFIG.write().unwrap_or_else(|e| e.into_inner());
    guard.get_or_insert_with(Config::default_config).clone()
}

fn droidrepo_root() -> String {
    std::env::var("DROIDREPO_ROOT")
        .unwrap_or_else(|_| format!("{}/droidrepo", xdg_data_home().display()))
}

fn default_abis() -> Vec<String> {
    let abis: &[&str] = match std::env::consts::ARCH {
        "aarch64" => &["arm64-v8a", "armeabi-v7a", "armeabi"],
        "arm" => &["armeabi-v7a", "armeabi"],
        "x86" => &["x86"],
        _ => &["x86_64", "x86"],
    };
    abis.iter().map(|s| s.to_string()).collect()
}

impl Config {
    pub fn default_config() -> Self {
        let root = droidrepo_root();

        Self {
            db_path: Some(format!("{root}/db/droidrepo.db")),
            cache_path: Some(format!("{root}/cache")),
            locales: Some(vec!["en-US".into()]),
            mirror_chooser: Some(MirrorChooserKind::Random),
            prefer_regional_mirrors: Some(false),
            prefer_worldwide_mirrors: Some(false),
            current_locations: None,
            proxy: None,
            user_agent: None,
            timeout_secs: Some(30),
            update_interval: Some("3h".into()),
            sdk_level: Some(34),
            supported_abis: Some(default_abis()),
            device_features: None,
            allow_unknown_sources: Some(true),
            repositories: default_repositories(),
        }
    }

    /// Reads the configuration file, using the defaults if it does not exist.
    pub fn new() -> Result<Self> {
        let config_path = CONFIG_PATH
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .to_path_buf();

        let mut config = match fs::read_to_string(&config_path) {
            Ok(content) => toml::from_str(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default_config(),
            Err(err) => return Err(ConfigError::IoError(err)),
        };

        config.resolve()?;
        Ok(config)
    }

    /// Validates the configuration and fills in defaults for unset options.
    pub fn resolve(&mut self) -> Result<()> {
        if self.prefer_regional_mirrors.unwrap_or(false)
            && self.prefer_worldwide_mirrors.unwrap_or(false)
        {
            return Err(ConfigError::ConflictingMirrorPreferences);
        }

        self.locales.get_or_insert_with(|| vec!["en-US".into()]);
        self.mirror_chooser.get_or_insert_with(Default::default);
        self.timeout_secs.get_or_insert(30);
        self.sdk_level.get_or_insert(34);
        self.supported_abis.get_or_insert_with(default_abis);
        self.allow_unknown_sources.get_or_insert(true);

        let mut seen = HashSet::new();
        for repo in &mut self.repositories {
            let address = repo.normalized_address().to_string();
            let scheme_ok = ["https://", "http://", "file://"]
                .iter()
                .any(|scheme| address.starts_with(scheme));
            if !scheme_ok {
                return Err(ConfigError::InvalidRepositoryAddress(repo.address.clone()));
            }
            if !seen.insert(address.to_lowercase()) {
                return Err(ConfigError::DuplicateRepositoryAddress(address));
            }
            repo.enabled.get_or_insert(true);
        }

        Ok(())
    }

    pub fn get_db_path(&self) -> Result<PathBuf> {
        if let Ok(env_path) = std::env::var("DROIDREPO_DB") {
            return Ok(resolve_path(&env_path)?);
        }
        match &self.db_path {
            Some(path) => Ok(resolve_path(path)?),
            None => Ok(resolve_path(&format!("{}/db/droidrepo.db", droidrepo_root()))?),
        }
    }

    pub fn get_cache_path(&self) -> Result<PathBuf> {
        if let Ok(env_path) = std::env::var("DROIDREPO_CACHE") {
            return Ok(resolve_path(&env_path)?);
        }
        match &self.cache_path {
            Some(path) => Ok(resolve_path(path)?),
            None => Ok(resolve_path(&format!("{}/cache", droidrepo_root()))?),
        }
    }

    /// Update interval in milliseconds.
    pub fn get_update_interval(&self) -> u128 {
        match self.update_interval.as_deref().unwrap_or("3h") {
            "always" => 0,
            "never" => u128::MAX,
            value => parse_duration(value).map_or(3 * 3_600_000, u128::from),
        }
    }

    pub fn locales(&self) -> Vec<String> {
        self.locales
            .clone()
            .unwrap_or_else(|| vec!["en-US".into()])
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("droidrepo/{}", env!("CARGO_PKG_VERSION")))
    }

    pub fn get_repository(&self, address: &str) -> Option<&RepositoryConfig> {
        let address = address.trim_end_matches('/');
        self.repositories
            .iter()
            .find(|repo| repo.normalized_address().eq_ignore_ascii_case(address))
    }

    pub fn save(&self) -> Result<()> {
        let config_path = CONFIG_PATH
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .to_path_buf();
        let serialized = toml::to_string_pretty(self)?;
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&config_path, serialized)?;
        info!("Configuration saved to {}", config_path.display());
        Ok(())
    }

    pub fn to_annotated_document(&self) -> Result<DocumentMut> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut doc = toml_string.parse::<DocumentMut>()?;

        annotate_toml_table::<Config>(doc.as_table_mut(), true)?;

        if let Some(repositories) = doc
            .get_mut("repositories")
            .and_then(|item| item.as_array_of_tables_mut())
        {
            annotate_toml_array_of_tables::<RepositoryConfig>(repositories)?;
        }

        Ok(doc)
    }
}

/// Writes the annotated default configuration to the configuration path.
pub fn generate_default_config() -> Result<PathBuf> {
    let config_path = CONFIG_PATH
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .to_path_buf();

    if config_path.exists() {
        return Err(ConfigError::ConfigAlreadyExists);
    }

    let doc = Config::default_config().to_annotated_document()?;

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&config_path, doc.to_string())?;
    info!(
        "Default configuration file generated with documentation at: {}",
        config_path.display()
    );
    Ok(config_path)
}
