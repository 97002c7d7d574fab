//! HTTP download and upload producers.

use std::io::{ErrorKind, Read};
use std::time::Duration;

use reqwest::blocking::{Body, Client};
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::{CallbackReader, JunkReader, Transfer, TransferError};
use crate::bench::ChunkSink;

/// Read size for downloads (16KB).
const CHUNK_SIZE: usize = 16 * 1024;

/// Asset fetched from the directory of the server's upload URL.
const DOWNLOAD_ASSET: &str = "random1000x1000.jpg";

/// Build the blocking client shared by all transfers of a run.
///
/// Only connecting is bounded; a transfer itself may run as long as the
/// benchmark keeps it alive.
pub fn build_client(connect_timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(None::<Duration>)
        .build()
}

pub struct DownloadTransfer {
    client: Client,
    asset_url: String,
}

impl DownloadTransfer {
    pub fn new(client: Client, server_url: &str) -> Self {
        let base = server_url.rfind('/').map_or(server_url, |i| &server_url[..i]);
        Self {
            client,
            asset_url: format!("{base}/{DOWNLOAD_ASSET}"),
        }
    }

    pub fn asset_url(&self) -> &str {
        &self.asset_url
    }
}

impl Transfer for DownloadTransfer {
    fn run_once(&self, sink: &ChunkSink) -> Result<(), TransferError> {
        // Cache buster so every task pulls fresh bytes
        let url = format!("{}?x={}", self.asset_url(), rand::random::<u32>());
        let mut resp = self.client.get(&url).send()?;
        if !resp.status().is_success() {
            return Err(TransferError::Status { status: resp.status() });
        }

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match resp.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if sink.record(n).is_err() {
                break;
            }
        }
        Ok(())
    }
}

pub struct UploadTransfer {
    client: Client,
    url: String,
    payload_size: Option<u64>,
}

impl UploadTransfer {
    /// `payload_size` of `None` streams junk until time runs out.
    pub fn new(client: Client, server_url: &str, payload_size: Option<u64>) -> Self {
        Self {
            client,
            url: server_url.to_string(),
            payload_size,
        }
    }
}

impl Transfer for UploadTransfer {
    fn run_once(&self, sink: &ChunkSink) -> Result<(), TransferError> {
        let reader = CallbackReader::new(JunkReader::new(self.payload_size), sink.clone());
        let body = match self.payload_size {
            Some(len) => Body::sized(reader, len),
            None => Body::new(reader),
        };

        match self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
        {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(TransferError::Status { status: resp.status() }),
            // The body reader aborted the request once time ran out
            Err(e) if sink.is_expired() => {
                debug!(?e, "Upload stopped at deadline");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
