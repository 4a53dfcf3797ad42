pub mod chooser;
pub mod downloader;
pub mod error;
pub mod http;
pub mod http_client;
pub mod mirror;
pub mod parameters;
