use hyper::Uri;
use serde::Serialize;

use crate::proxy::models::ProxyCandidate;

/// Represents one upstream list of proxies.
#[derive(Debug, Clone)]
pub struct Source {
    pub name: &'static str, // Label used in error records.
    pub url: Uri,           // URL of the proxy list.
    pub accept: &'static str, // Value of the Accept header.
}

impl Source {
    /// A plain-text list with one `ip:port` per line.
    pub fn text(name: &'static str, url: &'static str) -> Self {
        Self {
            name,
            url: Uri::from_static(url),
            accept: "text/plain",
        }
    }

    /// An HTML page holding a table of proxies.
    pub fn html(name: &'static str, url: &'static str) -> Self {
        Self {
            name,
            url: Uri::from_static(url),
            accept: "text/html,application/xhtml+xml",
        }
    }
}

/// A failed upstream source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceError {
    pub source: String,
    pub message: String,
}

impl SourceError {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }
}

/// Output of one acquisition: deduplicated candidates plus per-source errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateBatch {
    pub candidates: Vec<ProxyCandidate>,
    pub errors: Vec<SourceError>,
}
