use async_trait::async_trait;
use hyper::Uri;

use crate::{
    error::{Error, Result},
    proxy::{client::ProxyClient, models::ProxyCandidate},
};

/// Whether a target status proves the proxy forwarded the request.
///
/// 403 and 405 count: the target blocked the request, but the proxy got it
/// there.
pub fn is_live_status(status: u16) -> bool {
    (200..400).contains(&status) || status == 403 || status == 405
}

/// One network attempt through a candidate.
///
/// Implementations report the target's status code on success and an
/// [`Error::Probe`] otherwise. They do not apply a timeout themselves; the
/// validator bounds every call and drops the future on expiry or
/// cancellation, so all resources must be released on drop.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, proxy: &ProxyCandidate, target: &Uri) -> Result<u16>;
}

/// Probes candidates with a real `GET` through [`ProxyClient`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpProber;

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, proxy: &ProxyCandidate, target: &Uri) -> Result<u16> {
        let client = ProxyClient::new(*proxy);
        let status = client
            .get_status(target)
            .await
            .map_err(|e| Error::probe(e.to_string(), None))?
            .as_u16();

        if is_live_status(status) {
            client.log_trace(format!("{} answered {}", target, status));
            Ok(status)
        } else {
            Err(Error::probe(
                format!("status {} received from target", status),
                Some(status),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_statuses() {
        for status in [200, 204, 301, 302, 399, 403, 405] {
            assert!(is_live_status(status), "{status}");
        }
        for status in [100, 199, 400, 401, 404, 407, 429, 500, 502] {
            assert!(!is_live_status(status), "{status}");
        }
    }
}
