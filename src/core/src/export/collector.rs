use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::CONTENT_TYPE;

use crate::error_handling::types::ExportError;
use crate::export::json_stream::JsonArrayStream;

/// Remote sink for exported events.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Sends `body` and returns the status code of the completed round trip.
    ///
    /// Transport failures and timeouts are errors; any HTTP response, whatever
    /// its status, is `Ok`.
    async fn submit(&self, body: JsonArrayStream) -> Result<u16, ExportError>;
}

/// Collector reached with an HTTP POST of the streamed JSON array.
pub struct HttpCollector {
    client: reqwest::Client,
    url: String,
}

impl HttpCollector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExportError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

fn classify(err: reqwest::Error) -> ExportError {
    if err.is_timeout() {
        ExportError::Timeout
    } else {
        ExportError::Network(err.to_string())
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn submit(&self, body: JsonArrayStream) -> Result<u16, ExportError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        debug!("Collector {} answered {}", self.url, status);
        Ok(status)
    }
}
