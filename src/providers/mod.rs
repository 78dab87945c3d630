//! Candidate acquisition from public proxy lists.

pub mod free_proxy_list;
pub mod github;
pub mod models;
pub mod proxyscrape;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use fake::{faker::internet::en::UserAgent, Fake};
use hashbrown::HashSet;
use http_body_util::{BodyExt, Empty};
use hyper::{
    body::Bytes,
    header::{ACCEPT, USER_AGENT},
    Request,
};
use hyper_tls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use rand::seq::SliceRandom;
use tokio::{task::JoinSet, time};

pub use free_proxy_list::FreeProxyListProvider;
pub use github::GithubRepoProvider;
pub use models::{CandidateBatch, Source, SourceError};
pub use proxyscrape::ProxyscrapeProvider;

use crate::{
    error::{Error, Result},
    proxy::models::ProxyCandidate,
};

pub type HttpClient = Client<HttpsConnector<HttpConnector>, Empty<Bytes>>;

/// Produces the candidate list for one refresh cycle.
#[async_trait]
pub trait CandidateSupplier: Send + Sync {
    /// Loads a deduplicated candidate list, never taking longer than `budget`.
    ///
    /// A failing source becomes one [`SourceError`] in the batch; an `Err`
    /// means acquisition failed as a whole.
    async fn load_candidates(&self, budget: Duration) -> Result<CandidateBatch>;
}

/// An upstream publisher of proxy lists.
#[async_trait]
pub trait IProxyTrait: Send + Sync {
    fn sources(&self) -> Vec<Source>;

    /// Downloads one source. Non-2xx responses are errors.
    async fn fetch(&self, client: &HttpClient, source: &Source) -> anyhow::Result<String> {
        let req = Request::get(source.url.clone())
            .header(USER_AGENT, UserAgent().fake::<&str>())
            .header(ACCEPT, source.accept)
            .body(Empty::<Bytes>::new())?;
        let response = client.request(req).await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("request to {} failed with status {}", source.name, status.as_u16());
        }
        let body = response.collect().await?.to_bytes();
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Extracts candidates from a downloaded body.
    fn scrape(&self, body: &str) -> Vec<ProxyCandidate> {
        parse_proxy_lines(body)
    }
}

/// Parses one `ip:port` per line, skipping anything else.
pub fn parse_proxy_lines(body: &str) -> Vec<ProxyCandidate> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| line.parse().ok())
        .collect()
}

/// Fetches every source of every provider concurrently.
pub struct ProviderSupplier {
    providers: Vec<Arc<dyn IProxyTrait>>, // Providers in merge order.
    client: Arc<HttpClient>,              // Shared HTTPS client.
}

impl ProviderSupplier {
    /// A supplier over the built-in providers.
    pub fn new() -> Result<Self> {
        let free_proxy_list =
            FreeProxyListProvider::new().map_err(|e| Error::supplier(e.to_string()))?;
        Ok(Self::with_providers(vec![
            Arc::new(ProxyscrapeProvider),
            Arc::new(free_proxy_list),
            Arc::new(GithubRepoProvider),
        ]))
    }

    pub fn with_providers(providers: Vec<Arc<dyn IProxyTrait>>) -> Self {
        let client =
            Client::builder(TokioExecutor::new()).build::<_, Empty<Bytes>>(HttpsConnector::new());
        Self {
            providers,
            client: Arc::new(client),
        }
    }

    /// Adds a custom proxy provider to the supplier.
    pub fn add_provider(&mut self, provider: Arc<dyn IProxyTrait>) {
        self.providers.push(provider);
    }
}

/// Executes the work of fetching and scraping a given source.
async fn do_work(
    provider: Arc<dyn IProxyTrait>,
    client: Arc<HttpClient>,
    source: Source,
) -> anyhow::Result<Vec<ProxyCandidate>> {
    let body = provider.fetch(&client, &source).await?;
    Ok(provider.scrape(&body))
}

/// Merges per-source results in order, dropping duplicates.
fn merge(results: Vec<Vec<ProxyCandidate>>) -> Vec<ProxyCandidate> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .flatten()
        .filter(|proxy| seen.insert(*proxy))
        .collect()
}

#[async_trait]
impl CandidateSupplier for ProviderSupplier {
    /// Fails with [`Error::Supplier`] when every source failed, instead of
    /// returning an empty batch, so the last good raw list is kept.
    async fn load_candidates(&self, budget: Duration) -> Result<CandidateBatch> {
        let deadline = time::Instant::now() + budget;
        let mut tasks = JoinSet::new();
        let mut names = vec![];

        for provider in &self.providers {
            for source in provider.sources() {
                let index = names.len();
                names.push(source.name);
                let provider = Arc::clone(provider);
                let client = Arc::clone(&self.client);
                tasks.spawn(async move {
                    let result = time::timeout_at(deadline, do_work(provider, client, source)).await;
                    (index, result)
                });
            }
        }

        #[cfg(feature = "log")]
        log::debug!(
            "Proxy gathering started. Collecting proxies from {} sources",
            names.len()
        );

        let mut results: Vec<Option<std::result::Result<Vec<ProxyCandidate>, String>>> =
            vec![None; names.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(Ok(found)))) => results[index] = Some(Ok(found)),
                Ok((index, Ok(Err(e)))) => results[index] = Some(Err(e.to_string())),
                Ok((index, Err(_))) => {
                    results[index] = Some(Err(format!(
                        "timed out after {} ms",
                        budget.as_millis()
                    )))
                }
                // A panicked source stays `None` and is reported below.
                Err(_) => {}
            }
        }

        let mut found = vec![];
        let mut errors = vec![];
        for (name, result) in names.iter().zip(results) {
            match result {
                Some(Ok(proxies)) => {
                    #[cfg(feature = "log")]
                    log::debug!("{}: {} proxies", name, proxies.len());
                    found.push(proxies);
                }
                Some(Err(message)) => {
                    #[cfg(feature = "log")]
                    log::warn!("{}: {}", name, message);
                    errors.push(SourceError::new(*name, message));
                }
                None => errors.push(SourceError::new(*name, "source task failed")),
            }
        }

        if !names.is_empty() && errors.len() == names.len() {
            let detail = errors
                .iter()
                .map(|e| format!("{}: {}", e.source, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::supplier(format!("all proxy sources failed ({})", detail)));
        }

        let mut candidates = merge(found);
        candidates.shuffle(&mut rand::thread_rng());

        #[cfg(feature = "log")]
        log::info!(
            "Collected {} unique proxies ({} source errors)",
            candidates.len(),
            errors.len()
        );
        Ok(CandidateBatch { candidates, errors })
    }
}
