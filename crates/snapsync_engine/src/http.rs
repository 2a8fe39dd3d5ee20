//! HTTP transport implementation.
//!
//! This module maps the [`CacheTransport`] contract onto an HTTP surface.
//! The actual HTTP client is abstracted via a trait so different libraries
//! (reqwest, hyper, ureq) can provide the transport; bodies are CBOR.

use crate::error::{EngineError, EngineResult};
use crate::transport::CacheTransport;
use snapsync_protocol::{
    AckResponse, ChainId, ChainStatusResponse, Chunk, ExistsResponse, FinalizeRequest,
    SnapshotManifest, StoreKind, UploadChunkRequest, UploadManifestRequest, GLOBAL_STORE,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// HTTP client abstraction.
///
/// Implementations must apply their own per-request timeout; the engine
/// treats any client error as a retryable transport failure.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Sends a GET request and returns the response body.
    fn get(&self, url: &str) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based cache transport.
pub struct HttpCacheTransport<C: HttpClient> {
    /// Base URL of the remote cache (e.g. `https://cache.example.com`).
    base_url: String,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpCacheTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error message, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().ok().and_then(|e| e.clone())
    }

    /// Returns true if the transport considers itself connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn record_failure(&self, err: &str) {
        if let Ok(mut slot) = self.last_error.write() {
            *slot = Some(err.to_string());
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn record_success(&self) {
        if let Ok(mut slot) = self.last_error.write() {
            *slot = None;
        }
        self.connected.store(true, Ordering::SeqCst);
    }

    fn post_ack(&self, endpoint: &str, body: Vec<u8>) -> EngineResult<AckResponse> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self.client.post(&url, body).map_err(|e| {
            self.record_failure(&e);
            EngineError::transport_retryable(e)
        })?;
        self.record_success();
        let ack = AckResponse::decode(&response)?;
        Ok(ack)
    }

    fn get_body(&self, endpoint: &str) -> EngineResult<Vec<u8>> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self.client.get(&url).map_err(|e| {
            self.record_failure(&e);
            EngineError::transport_retryable(e)
        })?;
        self.record_success();
        Ok(response)
    }
}

impl<C: HttpClient> CacheTransport for HttpCacheTransport<C> {
    fn upload_manifest(&self, owner: &str, manifest: &SnapshotManifest) -> EngineResult<()> {
        let request = UploadManifestRequest {
            owner: owner.to_string(),
            timestamp_ms: manifest.timestamp_ms,
            manifest: manifest.clone(),
        };
        let ack = self.post_ack("/v1/manifest", request.encode()?)?;
        if ack.success {
            Ok(())
        } else {
            Err(EngineError::Remote(
                ack.error.unwrap_or_else(|| "manifest rejected".into()),
            ))
        }
    }

    fn upload_chunk(
        &self,
        owner: &str,
        store: &str,
        chunk: &Chunk,
        total_chunks: u32,
    ) -> EngineResult<()> {
        let request = UploadChunkRequest::from_chunk(owner, store, chunk, total_chunks);
        let ack = self.post_ack("/v1/chunk", request.encode()?)?;
        if ack.success {
            Ok(())
        } else {
            // The remote rejects chunks only for hash/size violations, which
            // are fatal to the run.
            Err(EngineError::integrity(
                store,
                chunk.index,
                ack.error.unwrap_or_else(|| "chunk rejected".into()),
            ))
        }
    }

    fn finalize_sync(
        &self,
        owner: &str,
        store: StoreKind,
        timestamp_ms: u64,
        manifest: &SnapshotManifest,
    ) -> EngineResult<()> {
        let request = FinalizeRequest {
            owner: owner.to_string(),
            store: store.name().to_string(),
            timestamp_ms,
            manifest: Some(manifest.clone()),
        };
        let ack = self.post_ack("/v1/finalize", request.encode()?)?;
        if ack.success {
            Ok(())
        } else {
            Err(EngineError::Remote(
                ack.error.unwrap_or_else(|| "finalize rejected".into()),
            ))
        }
    }

    fn finalize_snapshot(&self, owner: &str, timestamp_ms: u64) -> EngineResult<()> {
        let request = FinalizeRequest {
            owner: owner.to_string(),
            store: GLOBAL_STORE.to_string(),
            timestamp_ms,
            manifest: None,
        };
        let ack = self.post_ack("/v1/finalize", request.encode()?)?;
        if ack.success {
            Ok(())
        } else {
            Err(EngineError::Remote(
                ack.error.unwrap_or_else(|| "finalize rejected".into()),
            ))
        }
    }

    fn chain_bootstrap_exists(&self, chain: ChainId) -> EngineResult<bool> {
        let body = self.get_body(&format!("/v1/bootstrap/{chain}"))?;
        let response = ExistsResponse::decode(&body)?;
        Ok(response.exists)
    }

    fn chain_status(&self, owner: &str) -> EngineResult<ChainStatusResponse> {
        let body = self.get_body(&format!("/v1/chains/{owner}"))?;
        let response = ChainStatusResponse::decode(&body)?;
        Ok(response)
    }
}
