use async_trait::async_trait;

use super::models::Source;
use super::IProxyTrait;

/// Plain-text HTTP proxy lists published from GitHub repositories.
pub struct GithubRepoProvider;

#[async_trait]
impl IProxyTrait for GithubRepoProvider {
    fn sources(&self) -> Vec<Source> {
        vec![
            Source::text(
                "speedx-http",
                "https://raw.githubusercontent.com/TheSpeedX/SOCKS-List/master/http.txt",
            ),
            Source::text(
                "fresh-proxy-list",
                "https://vakhov.github.io/fresh-proxy-list/proxylist.txt",
            ),
        ]
    }
}
