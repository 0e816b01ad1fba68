//! # HTTP decoy
//!
//! Answers every request, whatever its method, path or host, with the decoy
//! identity selected for its host, after recording the request:
//!
//! ```text
//! ┌──────────┐  request   ┌──────────────┐  CapturedEvent  ┌───────────────┐
//! │ Scanner  │───────────▶│ HttpListener │────────────────▶│ EventRecorder │
//! │          │◀───────────│              │                 └───────────────┘
//! └──────────┘ 200 + page └──────┬───────┘
//!                                │ host
//!                         ┌──────▼───────┐
//!                         │ DecoySelector│
//!                         └──────────────┘
//! ```
//!
//! Only the first `body_cap` bytes of a request body are read. Nothing that
//! goes wrong on the capture side changes the response.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, HOST, SERVER};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioIo, TokioTimer};
use log::{debug, info, trace, warn};
use tokio::net::TcpListener;
use tokio::time::Instant;

use super::types::{canonical_header_key, client_address, unix_now};
use crate::data_capture::recorder::EventRecorder;
use crate::data_capture::types::{CapturedEvent, HttpRequestCapture};
use crate::decoy::selector::{DecoyIdentity, DecoySelector};
use crate::error_handling::types::NetworkError;

pub const BODY_TOO_LARGE: &str = "http: request body too large";
pub const BODY_READ_TIMEOUT: &str = "http: request body read timed out";

/// Delay before accepting again after a failed `accept`.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpLimits {
    pub body_cap: usize,
    /// Headers and body must arrive within this time
    pub read_timeout: Duration,
    /// Time left to send the response once the request is read
    pub write_timeout: Duration,
}

/// Request handling shared by every connection.
pub struct HttpDecoy {
    selector: Arc<DecoySelector>,
    recorder: Arc<EventRecorder>,
    limits: HttpLimits,
}

pub struct HttpListener {
    listener: TcpListener,
    decoy: Arc<HttpDecoy>,
}

/// Reads `body` until its end, `cap` bytes, an error or `deadline`, whichever
/// comes first. Returns what was read and, unless the body ended cleanly, why
/// reading stopped.
pub async fn read_capped<B>(mut body: B, cap: usize, deadline: Instant) -> (Vec<u8>, Option<String>)
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: fmt::Display,
{
    let mut buf = Vec::new();
    loop {
        let frame = match tokio::time::timeout_at(deadline, body.frame()).await {
            Err(_) => return (buf, Some(BODY_READ_TIMEOUT.to_string())),
            Ok(None) => return (buf, None),
            Ok(Some(Err(e))) => return (buf, Some(e.to_string())),
            Ok(Some(Ok(frame))) => frame,
        };
        // Trailers
        let Ok(data) = frame.into_data() else {
            continue;
        };

        let room = cap - buf.len();
        if data.len() > room {
            buf.extend_from_slice(&data[..room]);
            return (buf, Some(BODY_TOO_LARGE.to_string()));
        }
        buf.extend_from_slice(&data);
    }
}

/// The page and `Server` banner of `identity` as a 200 response.
pub fn decoy_response(identity: DecoyIdentity<'_>) -> Response<Full<Bytes>> {
    let page = identity.page;
    let mut res = Response::new(Full::new(page.body.clone()));
    let headers = res.headers_mut();
    headers.insert(SERVER, identity.server.clone());
    // Guessed MIME types are plain ASCII.
    if let Ok(content_type) = HeaderValue::from_str(&page.content_type) {
        headers.insert(CONTENT_TYPE, content_type);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(page.body.len()));
    res
}

impl HttpDecoy {
    pub fn new(
        selector: Arc<DecoySelector>,
        recorder: Arc<EventRecorder>,
        limits: HttpLimits,
    ) -> Self {
        Self {
            selector,
            recorder,
            limits,
        }
    }

    /// Records `req` then answers it with the decoy for its host.
    pub async fn handle<B>(&self, peer: SocketAddr, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Unpin,
        B::Error: fmt::Display,
    {
        let deadline = Instant::now() + self.limits.read_timeout;
        let (parts, body) = req.into_parts();

        // Absolute-form target first, then the Host header.
        let host = parts
            .uri
            .authority()
            .map(|a| a.to_string())
            .or_else(|| {
                parts
                    .headers
                    .get(HOST)
                    .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            })
            .unwrap_or_default();

        let mut header: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in parts.headers.iter().filter(|(name, _)| *name != HOST) {
            header
                .entry(canonical_header_key(name.as_str()))
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let (body, error) = read_capped(body, self.limits.body_cap, deadline).await;

        let event = HttpRequestCapture {
            address: client_address(peer),
            time: unix_now(),
            host,
            method: parts.method.to_string(),
            url: parts.uri.to_string(),
            proto: format!("{:?}", parts.version),
            header,
            body: String::from_utf8_lossy(&body).into_owned(),
            error,
        };
        let identity = self.selector.select(&event.host);
        trace!(
            "[{}] {} {} for host {:?} served {}",
            event.address,
            event.method,
            event.url,
            event.host,
            identity.page.path
        );

        self.recorder.capture(CapturedEvent::Http(event)).await;
        decoy_response(identity)
    }
}

impl HttpListener {
    pub async fn bind(addr: SocketAddr, decoy: HttpDecoy) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(NetworkError::BindError)?;
        Ok(Self {
            listener,
            decoy: Arc::new(decoy),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.listener.local_addr().map_err(NetworkError::SockError)
    }

    /// Accepts connections until the task is dropped, one task per connection.
    pub async fn run(self) {
        if let Ok(addr) = self.local_addr() {
            info!("HTTP decoy listening on {}", addr);
        }

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("HTTP accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            debug!("[{}] HTTP connection accepted", peer);

            let decoy = Arc::clone(&self.decoy);
            tokio::spawn(async move {
                let limits = decoy.limits;
                let service = service_fn(move |req: Request<Incoming>| {
                    let decoy = Arc::clone(&decoy);
                    async move { Ok::<_, Infallible>(decoy.handle(peer, req).await) }
                });

                let conn = http1::Builder::new()
                    .timer(TokioTimer::new())
                    .header_read_timeout(limits.read_timeout)
                    .serve_connection(TokioIo::new(stream), service);

                let lifetime = limits.read_timeout + limits.write_timeout;
                match tokio::time::timeout(lifetime, conn).await {
                    Ok(Ok(())) => trace!("[{}] HTTP connection closed", peer),
                    Ok(Err(e)) => debug!("[{}] HTTP connection error: {}", peer, e),
                    Err(_) => debug!("[{}] HTTP connection cut after {:?}", peer, lifetime),
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoy::catalog::{DecoyPage, PageCatalog};
    use crate::error_handling::types::StorageError;
    use crate::storage::memory_storage::MemoryStorage;
    use crate::storage::storage_trait::{EntryStream, Storage};
    use async_trait::async_trait;
    use futures_util::stream;
    use futures_util::StreamExt;
    use http_body_util::StreamBody;
    use hyper::body::Frame;
    use hyper::StatusCode;
    use std::io;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn limits() -> HttpLimits {
        HttpLimits {
            body_cap: 16,
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
        }
    }

    const APPEND_TIMEOUT: Duration = Duration::from_secs(1);

    fn decoy_over(storage: Arc<dyn Storage>) -> HttpDecoy {
        let catalog = PageCatalog::from_pages(vec![
            DecoyPage::new("a.html", "<p>a</p>"),
            DecoyPage::new("b.txt", "b"),
        ])
        .unwrap();
        let selector = DecoySelector::new(vec!["nginx/1.21.0".into()], catalog).unwrap();
        let recorder = EventRecorder::new(storage, APPEND_TIMEOUT);
        HttpDecoy::new(Arc::new(selector), Arc::new(recorder), limits())
    }

    fn decoy(storage: &MemoryStorage) -> HttpDecoy {
        decoy_over(Arc::new(storage.clone()))
    }

    /// Store whose appends fail right away.
    struct BrokenStorage;

    /// Store whose appends never complete.
    struct StalledStorage;

    #[async_trait]
    impl Storage for BrokenStorage {
        async fn append(&self, _entry: &[u8]) -> Result<i64, StorageError> {
            Err(StorageError::WriteFailed)
        }
        fn scan_from(&self, _after_id: i64) -> EntryStream {
            stream::empty().boxed()
        }
        async fn delete_up_to(&self, _id: i64) -> Result<u64, StorageError> {
            Ok(0)
        }
        async fn count(&self) -> Result<u64, StorageError> {
            Ok(0)
        }
    }

    #[async_trait]
    impl Storage for StalledStorage {
        async fn append(&self, _entry: &[u8]) -> Result<i64, StorageError> {
            std::future::pending().await
        }
        fn scan_from(&self, _after_id: i64) -> EntryStream {
            stream::pending().boxed()
        }
        async fn delete_up_to(&self, _id: i64) -> Result<u64, StorageError> {
            std::future::pending().await
        }
        async fn count(&self) -> Result<u64, StorageError> {
            std::future::pending().await
        }
    }

    fn scan_request() -> Request<Full<Bytes>> {
        Request::get("/wp-login.php")
            .header("host", "victim.example")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn assert_decoy_served(decoy: &HttpDecoy, res: Response<Full<Bytes>>) {
        let expected = decoy.selector.select("victim.example");
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[SERVER], "nginx/1.21.0");
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, expected.page.body);
    }

    fn stored(storage: &MemoryStorage) -> Vec<HttpRequestCapture> {
        storage
            .entries()
            .iter()
            .map(|row| match serde_json::from_slice(&row.entry).unwrap() {
                CapturedEvent::Http(h) => h,
                other => panic!("unexpected event {:?}", other),
            })
            .collect()
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn body_within_cap_is_read_whole() {
        let (body, error) = read_capped(Full::new(Bytes::from_static(b"exactly16bytes!!")), 16, deadline()).await;
        assert_eq!(body, b"exactly16bytes!!");
        assert_eq!(error, None);
    }

    #[tokio::test]
    async fn body_over_cap_is_truncated_to_cap() {
        let chunks = stream::iter(vec![
            Ok::<_, io::Error>(Frame::data(Bytes::from_static(b"0123456789"))),
            Ok(Frame::data(Bytes::from_static(b"abcdefghij"))),
        ]);
        let (body, error) = read_capped(StreamBody::new(chunks), 16, deadline()).await;
        assert_eq!(body, b"0123456789abcdef");
        assert_eq!(error.as_deref(), Some(BODY_TOO_LARGE));
    }

    #[tokio::test]
    async fn read_error_keeps_what_arrived() {
        let chunks = stream::iter(vec![
            Ok(Frame::data(Bytes::from_static(b"part"))),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let (body, error) = read_capped(StreamBody::new(chunks), 16, deadline()).await;
        assert_eq!(body, b"part");
        assert_eq!(error.as_deref(), Some("reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_body_times_out() {
        let chunks = stream::iter(vec![Ok::<_, io::Error>(Frame::data(Bytes::from_static(b"slow")))])
            .chain(stream::pending());
        let (body, error) = read_capped(StreamBody::new(chunks), 16, deadline()).await;
        assert_eq!(body, b"slow");
        assert_eq!(error.as_deref(), Some(BODY_READ_TIMEOUT));
    }

    #[tokio::test]
    async fn handle_records_request_and_serves_decoy() {
        let _ = env_logger::builder().is_test(true).try_init();
        let storage = MemoryStorage::new();
        let decoy = decoy(&storage);

        let req = Request::post("/login.php?next=%2F")
            .header("host", "victim.example")
            .header("user-agent", "zgrab/0.x")
            .header("x-custom", "one")
            .header("X-CUSTOM", "two")
            .body(Full::new(Bytes::from_static(b"user=admin&pass=admin")))
            .unwrap();
        let res = decoy.handle("[::ffff:192.0.2.44]:40000".parse().unwrap(), req).await;

        let expected = decoy.selector.select("victim.example");
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[SERVER], "nginx/1.21.0");
        assert_eq!(
            res.headers()[CONTENT_LENGTH],
            expected.page.body.len().to_string().as_str()
        );
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, expected.page.body);

        let events = stored(&storage);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.address, "192.0.2.44");
        assert_eq!(event.host, "victim.example");
        assert_eq!(event.method, "POST");
        assert_eq!(event.url, "/login.php?next=%2F");
        assert_eq!(event.proto, "HTTP/1.1");
        assert_eq!(event.header["User-Agent"], vec!["zgrab/0.x".to_string()]);
        assert_eq!(event.header["X-Custom"], vec!["one".to_string(), "two".to_string()]);
        assert!(!event.header.contains_key("Host"));
        assert_eq!(event.body, "user=admin&pass=");
        assert_eq!(event.error.as_deref(), Some(BODY_TOO_LARGE));
    }

    #[tokio::test]
    async fn failing_store_still_gets_the_decoy() {
        let _ = env_logger::builder().is_test(true).try_init();
        let decoy = decoy_over(Arc::new(BrokenStorage));

        let res = decoy.handle("192.0.2.7:5555".parse().unwrap(), scan_request()).await;
        assert_decoy_served(&decoy, res).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_store_delays_the_decoy_by_at_most_the_append_timeout() {
        let decoy = decoy_over(Arc::new(StalledStorage));

        let started = Instant::now();
        let res = tokio::time::timeout(
            APPEND_TIMEOUT + Duration::from_millis(100),
            decoy.handle("192.0.2.7:5555".parse().unwrap(), scan_request()),
        )
        .await
        .expect("response held back by the store");

        assert!(started.elapsed() >= APPEND_TIMEOUT);
        assert_decoy_served(&decoy, res).await;
    }

    #[tokio::test]
    async fn serves_over_a_real_socket() {
        let storage = MemoryStorage::new();
        let listener = HttpListener::bind("127.0.0.1:0".parse().unwrap(), decoy(&storage))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(listener.run());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /.env HTTP/1.1\r\nHost: 10.0.0.5\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = Vec::new();
        client.read_to_end(&mut raw).await.unwrap();
        let raw = String::from_utf8_lossy(&raw);

        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(raw.to_ascii_lowercase().contains("server: nginx/1.21.0\r\n"));

        let events = stored(&storage);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].host, "10.0.0.5");
        assert_eq!(events[0].address, "127.0.0.1");
        assert_eq!(events[0].body, "");
        assert_eq!(events[0].error, None);

        server.abort();
    }
}
