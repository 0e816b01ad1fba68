use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::TryStreamExt;
use leurre::configuration::config::Config;
use leurre::configuration::types::Mode;
use leurre::controller::controller_handler::Controller;
use leurre::data_capture::types::{CapturedEvent, HttpRequestCapture};
use leurre::decoy::catalog::PageCatalog;
use leurre::decoy::selector::{DecoySelector, SERVER_BANNERS};
use leurre::export::collector::HttpCollector;
use leurre::network::http_listener::BODY_TOO_LARGE;
use leurre::storage::database_storage::DatabaseStorage;
use leurre::storage::storage_trait::Storage;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

struct Running {
    http: SocketAddr,
    storage: Arc<dyn Storage>,
    stop: Option<oneshot::Sender<()>>,
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn start() -> Running {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = Box::leak(Box::new(TempDir::new().unwrap()));

    let mut config = Config::for_mode(Mode::Debug);
    config.http_addr = "127.0.0.1:0".parse().unwrap();
    config.ssh_addr = "127.0.0.1:0".parse().unwrap();
    config.database_path = dir.path().join("data.db");
    config.export_on_startup = false;

    let storage: Arc<dyn Storage> =
        Arc::new(DatabaseStorage::new_file(&config.database_path).await.unwrap());
    let collector = HttpCollector::new("http://127.0.0.1:9/collect", config.export_timeout).unwrap();
    let controller = Controller::with_parts(config, Arc::clone(&storage), Arc::new(collector))
        .await
        .unwrap();
    let http = controller.http_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(controller.run_until(async {
        let _ = stopped.await;
    }));

    Running {
        http,
        storage,
        stop: Some(stop),
    }
}

/// Sends `request` verbatim and returns (head, body) of the response.
async fn exchange(addr: SocketAddr, request: &[u8]) -> (String, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();

    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response head");
    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    (head, raw[split + 4..].to_vec())
}

fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

async fn captured(storage: &Arc<dyn Storage>) -> Vec<HttpRequestCapture> {
    storage
        .scan_from(0)
        .map_ok(|row| match serde_json::from_slice(&row.entry).unwrap() {
            CapturedEvent::Http(h) => h,
            other => panic!("unexpected event {:?}", other),
        })
        .try_collect()
        .await
        .unwrap()
}

#[tokio::test]
async fn same_host_always_gets_the_same_decoy() {
    let running = start().await;
    let request = b"GET / HTTP/1.1\r\nHost: shop.example\r\nConnection: close\r\n\r\n";

    let (first_head, first_body) = exchange(running.http, request).await;
    let (second_head, second_body) = exchange(running.http, request).await;

    assert!(first_head.starts_with("HTTP/1.1 200"));
    assert_eq!(header(&first_head, "server"), header(&second_head, "server"));
    assert_eq!(first_body, second_body);

    let selector = DecoySelector::with_default_banners(PageCatalog::embedded().unwrap());
    let expected = selector.select("shop.example");
    assert_eq!(header(&first_head, "server"), Some(expected.banner));
    assert!(SERVER_BANNERS.contains(&expected.banner));
    assert_eq!(first_body, expected.page.body.to_vec());
    assert_eq!(
        header(&first_head, "content-length"),
        Some(expected.page.body.len().to_string().as_str())
    );

    assert_eq!(captured(&running.storage).await.len(), 2);
}

#[tokio::test]
async fn oversized_body_is_captured_up_to_the_cap() {
    let running = start().await;
    let payload = "A".repeat(4096);
    let request = format!(
        "POST /cgi-bin/luci HTTP/1.1\r\nHost: 192.0.2.10\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        payload.len(),
        payload
    );

    let (head, body) = exchange(running.http, request.as_bytes()).await;
    assert!(head.starts_with("HTTP/1.1 200"));
    assert!(!body.is_empty());

    let events = captured(&running.storage).await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.method, "POST");
    assert_eq!(event.url, "/cgi-bin/luci");
    assert_eq!(event.host, "192.0.2.10");
    assert_eq!(event.address, "127.0.0.1");
    assert_eq!(event.body.len(), 1024);
    assert!(event.body.bytes().all(|b| b == b'A'));
    assert_eq!(event.error.as_deref(), Some(BODY_TOO_LARGE));
    assert_eq!(
        event.header["Content-Type"],
        vec!["application/x-www-form-urlencoded".to_string()]
    );
}

#[tokio::test]
async fn requests_without_host_are_still_served() {
    let running = start().await;

    let (head, body) = exchange(running.http, b"GET /robots.txt HTTP/1.0\r\n\r\n").await;
    assert_eq!(head.split_whitespace().nth(1), Some("200"));
    assert!(!body.is_empty());

    let events = captured(&running.storage).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].host, "");
    assert_eq!(events[0].proto, "HTTP/1.0");
}
