use std::{
    error::Error,
    fmt::{Debug, Display},
};

use fake::{faker::internet::en::UserAgent, Fake};
use http_body_util::Empty;
use hyper::{
    body::{Body, Bytes, Incoming},
    client::conn::http1::handshake,
    header::{HOST, USER_AGENT},
    Request, Response, StatusCode, Uri,
};
use hyper_util::rt::TokioIo;
use native_tls::TlsConnector;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    task::JoinHandle,
    time,
};

use crate::{
    negotiators::{HttpNegotiator, HttpsNegotiator, NegotiatorTrait},
    proxy::models::ProxyCandidate,
};

/// Owns the hyper connection driver; aborting it closes the socket.
///
/// Held for the whole request so that dropping the request future (timeout
/// or pass cancellation) tears the connection down instead of leaving it
/// running in the background.
struct ConnectionTask(JoinHandle<()>);

impl Drop for ConnectionTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Represents a client that talks to a target through a forward proxy.
pub struct ProxyClient {
    pub proxy: ProxyCandidate, // The proxy every request is routed through.
}

impl ProxyClient {
    /// Creates a new instance of `ProxyClient`.
    ///
    /// # Arguments
    ///
    /// * `proxy`: The proxy to route requests through.
    pub fn new(proxy: ProxyCandidate) -> Self {
        Self { proxy }
    }

    /// Establishes a TCP connection to the proxy server.
    ///
    /// # Returns
    ///
    /// A `TcpStream` if the connection is successful, or an error if it fails.
    async fn connect(&self) -> anyhow::Result<TcpStream> {
        let start_time = time::Instant::now();
        self.log_trace("Starting TCP connection");

        let tcp_stream = TcpStream::connect((self.proxy.ip, self.proxy.port)).await?;

        self.log_trace(format!("Connected in {:?}", start_time.elapsed()));
        Ok(tcp_stream)
    }

    /// Runs the HTTP/1 handshake over `io` and sends `req`.
    async fn send_over<IO, B>(&self, req: Request<B>, io: IO) -> anyhow::Result<Response<Incoming>>
    where
        IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        B: Body + 'static + Debug + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn Error + Send + Sync>>,
    {
        let (mut sender, conn) = handshake(TokioIo::new(io)).await?;

        #[cfg(feature = "log")]
        let addr = self.proxy.as_text();
        let _driver = ConnectionTask(tokio::spawn(async move {
            if let Err(_err) = conn.await {
                #[cfg(feature = "log")]
                log::trace!("{}: Connection error: {}", addr, _err);
            }
        }));

        self.log_trace(format!("Sending request: {:?}", req));
        let response = sender.send_request(req).await?;
        Ok(response)
    }

    /// Sends a request over TLS through an already negotiated tunnel.
    ///
    /// # Arguments
    ///
    /// * `req`: The HTTP request to send, in origin form.
    /// * `stream`: The tunnelled TCP stream.
    /// * `domain`: The name the target certificate must match.
    pub async fn send_with_tls<B>(
        &self,
        req: Request<B>,
        stream: TcpStream,
        domain: &str,
    ) -> anyhow::Result<Response<Incoming>>
    where
        B: Body + 'static + Debug + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn Error + Send + Sync>>,
    {
        self.log_trace("Starting TLS connection");
        let tls_connector = TlsConnector::builder().build()?;
        let connector = tokio_native_tls::TlsConnector::from(tls_connector);

        let tls_stream = connector.connect(domain, stream).await?;
        self.log_trace("TLS connection established successfully");

        self.send_over(req, tls_stream).await
    }

    /// Sends a request without TLS through the proxy.
    ///
    /// # Arguments
    ///
    /// * `req`: The HTTP request to send, in absolute form.
    /// * `stream`: The TCP stream to the proxy.
    pub async fn send_without_tls<B>(
        &self,
        req: Request<B>,
        stream: TcpStream,
    ) -> anyhow::Result<Response<Incoming>>
    where
        B: Body + 'static + Debug + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn Error + Send + Sync>>,
    {
        self.send_over(req, stream).await
    }

    /// Sends a request through the proxy.
    ///
    /// The negotiator runs on the raw proxy stream first; when it asks for
    /// TLS the request URI is rewritten to origin form before sending.
    ///
    /// # Type Parameters
    ///
    /// * `B`: The type of the request body.
    /// * `N`: The negotiator type that prepares the proxy stream.
    pub async fn send_request<B, N>(
        &self,
        mut req: Request<B>,
        negotiator: N,
    ) -> anyhow::Result<Response<Incoming>>
    where
        B: Body + 'static + Debug + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn Error + Send + Sync>>,
        N: NegotiatorTrait + Sync,
    {
        let mut stream = self.connect().await?;

        if let Err(e) = negotiator
            .negotiate(&mut stream, &self.proxy, req.uri())
            .await
        {
            anyhow::bail!("Failed to negotiate: {}", e);
        }

        if negotiator.with_tls() {
            let domain = req
                .uri()
                .host()
                .ok_or_else(|| anyhow::anyhow!("target URL has no host"))?
                .to_string();
            let origin_form = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/")
                .parse::<Uri>()?;
            *req.uri_mut() = origin_form;
            self.send_with_tls(req, stream, &domain).await
        } else {
            self.send_without_tls(req, stream).await
        }
    }

    /// Issues a single `GET target` through the proxy and returns the status.
    ///
    /// Redirects are not followed; the body is never read.
    pub async fn get_status(&self, target: &Uri) -> anyhow::Result<StatusCode> {
        let authority = target
            .authority()
            .ok_or_else(|| anyhow::anyhow!("target URL has no host"))?
            .to_string();
        let req = Request::get(target.clone())
            .header(HOST, authority)
            .header(USER_AGENT, UserAgent().fake::<&str>())
            .body(Empty::<Bytes>::new())?;

        let response = match target.scheme_str() {
            Some("https") => self.send_request(req, HttpsNegotiator).await?,
            Some("http") => self.send_request(req, HttpNegotiator).await?,
            other => anyhow::bail!("unsupported target scheme {:?}", other),
        };
        Ok(response.status())
    }

    /// Logs a trace message.
    ///
    /// # Arguments
    ///
    /// * `msg`: The message to log.
    #[allow(unused_variables)]
    pub fn log_trace<S>(&self, msg: S)
    where
        S: Display,
    {
        #[cfg(feature = "log")]
        log::trace!("{}: {}", self.proxy, msg);
    }
}
