use async_trait::async_trait;

use super::models::Source;
use super::IProxyTrait;

/// A provider for fetching proxy lists from proxyscrape.com.
pub struct ProxyscrapeProvider;

#[async_trait]
impl IProxyTrait for ProxyscrapeProvider {
    fn sources(&self) -> Vec<Source> {
        vec![Source::text(
            "proxyscrape",
            "https://api.proxyscrape.com/v4/free-proxy-list/get?request=displayproxies&protocol=http&timeout=10000&country=all&ssl=all&anonymity=all&skip=0&limit=2000",
        )]
    }
}
