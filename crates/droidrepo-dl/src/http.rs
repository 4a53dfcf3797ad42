use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ureq::{
    http::{header::CONTENT_LENGTH, Response},
    Body,
};

use crate::{error::DownloadError, http_client::SHARED_AGENT};

/// Basic-auth credentials for a request.
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

impl Credentials<'_> {
    pub fn header_value(&self) -> String {
        let token = BASE64.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }
}

pub struct Http;

impl Http {
    /// Issues a GET for `url`, optionally as a ranged request starting at `resume_from`.
    pub fn fetch(
        url: &str,
        resume_from: Option<u64>,
        credentials: Option<Credentials<'_>>,
    ) -> Result<Response<Body>, DownloadError> {
        let mut req = SHARED_AGENT.get(url);

        if let Some(pos) = resume_from {
            req = req.header("Range", &format!("bytes={pos}-"));
        }
        if let Some(credentials) = credentials {
            req = req.header("Authorization", &credentials.header_value());
        }

        req.call().map_err(|err| DownloadError::from_ureq(err, url))
    }

    pub fn content_length(resp: &Response<Body>) -> Option<u64> {
        resp.headers()
            .get(CONTENT_LENGTH)
            .and_then(|h| h.to_str().ok())
            .and_then(|len| len.parse().ok())
    }
}
