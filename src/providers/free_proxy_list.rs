use async_trait::async_trait;
use regex::Regex;

use super::models::Source;
use super::IProxyTrait;
use crate::proxy::models::ProxyCandidate;

/// Scrapes the HTML table on free-proxy-list.net.
pub struct FreeProxyListProvider {
    row: Regex,
}

impl FreeProxyListProvider {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            row: Regex::new(
                r"(?i)<tr[^>]*>\s*<td>(\d{1,3}(?:\.\d{1,3}){3})</td>\s*<td>(\d+)</td>",
            )?,
        })
    }
}

#[async_trait]
impl IProxyTrait for FreeProxyListProvider {
    fn sources(&self) -> Vec<Source> {
        vec![Source::html(
            "free-proxy-list",
            "https://free-proxy-list.net/en/",
        )]
    }

    fn scrape(&self, body: &str) -> Vec<ProxyCandidate> {
        self.row
            .captures_iter(body)
            .filter_map(|row| format!("{}:{}", &row[1], &row[2]).parse().ok())
            .collect()
    }
}
