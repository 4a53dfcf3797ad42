use url::Url;

/// One server that serves a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mirror {
    pub base_url: String,
    /// Free-form location tag such as a country code.
    pub location: Option<String>,
    pub is_ipfs_gateway: bool,
    /// The server answers TLS handshakes that carry no server name.
    pub works_without_sni: bool,
}

impl Mirror {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            location: None,
            is_ipfs_gateway: false,
            works_without_sni: false,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn ipfs_gateway(mut self) -> Self {
        self.is_ipfs_gateway = true;
        self
    }

    pub fn without_sni(mut self) -> Self {
        self.works_without_sni = true;
        self
    }

    /// Joins `path` onto the base URL with exactly one slash in between.
    pub fn get_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn is_onion(&self) -> bool {
        Url::parse(&self.base_url)
            .ok()
            .and_then(|url| url.host_str().map(|host| host.ends_with(".onion")))
            .unwrap_or(false)
    }
}

/// A file listed in an index: path relative to the repository root plus its metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexFile {
    pub name: String,
    pub sha256: Option<String>,
    pub size: Option<i64>,
    pub ipfs_cid_v1: Option<String>,
}

impl IndexFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Everything needed to fetch one file from any mirror of a repository.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub index_file: IndexFile,
    pub mirrors: Vec<Mirror>,
    /// Set when requests go through a proxy; only then are onion mirrors usable.
    pub proxy: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Mirror to try before all others. Also marks repository-fetch requests.
    pub try_first_mirror: Option<Mirror>,
}

impl DownloadRequest {
    pub fn new(index_file: IndexFile, mirrors: Vec<Mirror>) -> Self {
        Self {
            index_file,
            mirrors,
            proxy: None,
            username: None,
            password: None,
            try_first_mirror: None,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}
