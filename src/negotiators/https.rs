use async_trait::async_trait;
use hyper::Uri;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use super::NegotiatorTrait;
use crate::proxy::models::ProxyCandidate;

/// Upper bound for the proxy's reply to CONNECT.
const MAX_REPLY_LEN: usize = 8 * 1024;

/// A negotiator that opens a CONNECT tunnel for HTTPS targets.
pub struct HttpsNegotiator;

impl HttpsNegotiator {
    /// Generates a CONNECT request to be sent to the proxy server.
    ///
    /// # Arguments
    ///
    /// * `host`: The host to connect to through the proxy.
    /// * `port`: The port on that host.
    ///
    /// # Returns
    ///
    /// A `String` containing the raw bytes of the CONNECT request.
    fn generate_connect_request(&self, host: &str, port: u16) -> String {
        format!(
            "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\nProxy-Connection: keep-alive\r\n\r\n"
        )
    }
}

/// Reads the proxy reply up to the end of its header block.
async fn read_reply_head(stream: &mut TcpStream) -> anyhow::Result<Vec<u8>> {
    let mut reply = Vec::with_capacity(256);
    let mut buf = [0u8; 512];
    loop {
        let read = stream.read(&mut buf).await?;
        if read == 0 {
            anyhow::bail!("proxy closed the connection during CONNECT");
        }
        reply.extend_from_slice(&buf[..read]);
        if reply.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(reply);
        }
        if reply.len() > MAX_REPLY_LEN {
            anyhow::bail!("CONNECT reply exceeds {} bytes", MAX_REPLY_LEN);
        }
    }
}

#[async_trait]
impl NegotiatorTrait for HttpsNegotiator {
    /// Negotiates a tunnel through the proxy.
    ///
    /// # Arguments
    ///
    /// * `stream`: The TCP stream to negotiate.
    /// * `proxy`: The proxy being used for the negotiation.
    /// * `uri`: The URI to be accessed through the proxy.
    ///
    /// # Returns
    ///
    /// A result indicating success or failure of the negotiation.
    async fn negotiate(
        &self,
        stream: &mut TcpStream,
        proxy: &ProxyCandidate,
        uri: &Uri,
    ) -> anyhow::Result<()> {
        let host = uri
            .host()
            .ok_or_else(|| anyhow::anyhow!("target URL has no host"))?;
        if uri.scheme_str() != Some("https") {
            anyhow::bail!("Scheme is empty or not https");
        }
        let port = uri.port_u16().unwrap_or(443);

        self.log_trace(proxy, format!("Sending CONNECT for {}:{}", host, port));
        stream
            .write_all(self.generate_connect_request(host, port).as_bytes())
            .await?;

        let reply = read_reply_head(stream).await?;
        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut response = httparse::Response::new(&mut headers);
        response.parse(&reply)?;

        let code = response.code.unwrap_or_default();
        if !(200..300).contains(&code) {
            anyhow::bail!(
                "CONNECT refused with {}: {}",
                code,
                response.reason.unwrap_or("Unknown reason")
            );
        }
        self.log_trace(proxy, "Tunnel established");
        Ok(())
    }

    fn with_tls(&self) -> bool {
        true
    }
}
