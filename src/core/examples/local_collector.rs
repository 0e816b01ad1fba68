//! Stand-in for the remote collector, listening where `--debug` exports go.
//!
//! ```text
//! cargo run --example local_collector
//! cargo run -- --debug
//! kill -USR1 $(pidof leurre)    # export now instead of in 5 minutes
//! ```
//!
//! Every accepted export is logged and, when `COLLECTOR_OUT` names a
//! directory, written there as `<unix time>.json`.

use std::convert::Infallible;
use std::env;
use std::path::PathBuf;

use bytes::Bytes;
use env_logger::Env;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{error, info, warn};
use tokio::net::TcpListener;

const LISTEN: &str = "127.0.0.1:3002";

async fn collect(req: Request<Incoming>, out: Option<PathBuf>) -> Response<Full<Bytes>> {
    let status = if req.method() != Method::POST || req.uri().path() != "/collect" {
        StatusCode::NOT_FOUND
    } else {
        match req.into_body().collect().await {
            Err(e) => {
                warn!("Export body read failed: {}", e);
                StatusCode::BAD_REQUEST
            }
            Ok(body) => {
                let body = body.to_bytes();
                match serde_json::from_slice::<Vec<serde_json::Value>>(&body) {
                    Err(e) => {
                        warn!("Export is not a JSON array: {}", e);
                        StatusCode::BAD_REQUEST
                    }
                    Ok(events) => {
                        info!("Received {} events ({} bytes)", events.len(), body.len());
                        for event in events.iter() {
                            info!("  {}", event);
                        }
                        if let Some(dir) = out {
                            let path = dir.join(format!("{}.json", chrono::Utc::now().timestamp()));
                            if let Err(e) = tokio::fs::write(&path, &body).await {
                                error!("Unable to write {}: {}", path.display(), e);
                            }
                        }
                        StatusCode::OK
                    }
                }
            }
        }
    };

    let mut res = Response::new(Full::new(Bytes::new()));
    *res.status_mut() = status;
    res
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init();

    let out = env::var("COLLECTOR_OUT").ok().map(PathBuf::from);
    if let Some(dir) = &out {
        std::fs::create_dir_all(dir)?;
    }

    let listener = TcpListener::bind(LISTEN).await?;
    info!("Collecting on http://{}/collect", LISTEN);

    loop {
        let (stream, peer) = listener.accept().await?;
        let out = out.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let out = out.clone();
                async move { Ok::<_, Infallible>(collect(req, out).await) }
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                warn!("[{}] connection error: {}", peer, e);
            }
        });
    }
}
