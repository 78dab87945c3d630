mod https;

use std::fmt::Display;

use async_trait::async_trait;
pub use https::HttpsNegotiator;
use hyper::Uri;
use tokio::net::TcpStream;

use crate::proxy::models::ProxyCandidate;

/// Prepares a freshly connected proxy stream before the HTTP request is sent.
#[async_trait]
pub trait NegotiatorTrait {
    #[allow(unused_variables)]
    async fn negotiate(
        &self,
        stream: &mut TcpStream,
        proxy: &ProxyCandidate,
        uri: &Uri,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Whether the request must be wrapped in TLS after negotiation.
    fn with_tls(&self) -> bool {
        false
    }

    /// Logs a trace message.
    ///
    /// # Arguments
    ///
    /// * `msg`: The message to log.
    #[allow(unused_variables)]
    fn log_trace<S>(&self, proxy: &ProxyCandidate, msg: S)
    where
        S: Display,
    {
        #[cfg(feature = "log")]
        log::trace!("{}: {}", proxy, msg);
    }
}

/// Plain forward-proxy negotiator: the request goes out as-is in absolute form.
pub struct HttpNegotiator;

impl NegotiatorTrait for HttpNegotiator {}
