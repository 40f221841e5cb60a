//! HTTP peer client
//!
//! Peers expose chunks under `/chunks/{kind}/{hash}`:
//! - `HEAD` answers 200 when the chunk is held, 404 when it is not
//! - `PUT` stores the body, authorized by the signature headers
//! - `GET /status` is the liveness probe

use super::{PeerClient, PeerConnection};
use crate::common::{ChunkId, ChunkKind, Error, Result, SigningIdentity};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{StatusCode, Url};
use std::time::Duration;

pub const USER_HEADER: &str = "x-chunkrep-user";
pub const SIGNATURE_HEADER: &str = "x-chunkrep-signature";

#[derive(Clone)]
pub struct HttpPeerClient {
    http: reqwest::Client,
}

impl HttpPeerClient {
    /// `timeout` bounds each request end to end
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    /// Parse a peer address into a base URL ending in `/`
    pub fn base_url(address: &str) -> Result<Url> {
        let mut url = Url::parse(address)
            .map_err(|e| Error::ConnectionFailed(format!("invalid peer address {}: {}", address, e)))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    pub fn chunk_url(base: &Url, kind: ChunkKind, id: &ChunkId) -> Result<Url> {
        base.join(&format!("chunks/{}/{}", kind, id.to_hex()))
            .map_err(|e| Error::Internal(e.to_string()))
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn connect(&self, address: &str) -> Result<Box<dyn PeerConnection>> {
        Ok(Box::new(HttpConnection {
            http: self.http.clone(),
            base: Self::base_url(address)?,
            address: address.to_string(),
        }))
    }
}

struct HttpConnection {
    http: reqwest::Client,
    base: Url,
    address: String,
}

impl HttpConnection {
    fn rejected(&self, status: StatusCode) -> Error {
        Error::Rejected {
            peer: self.address.clone(),
            reason: status.to_string(),
        }
    }
}

#[async_trait]
impl PeerConnection for HttpConnection {
    async fn has_chunk(&mut self, id: &ChunkId, kind: ChunkKind) -> Result<bool> {
        let url = HttpPeerClient::chunk_url(&self.base, kind, id)?;
        let status = self.http.head(url).send().await?.status();
        match status {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(self.rejected(s)),
        }
    }

    async fn push_chunk(
        &mut self,
        identity: &SigningIdentity,
        id: &ChunkId,
        kind: ChunkKind,
        data: Bytes,
    ) -> Result<()> {
        let url = HttpPeerClient::chunk_url(&self.base, kind, id)?;
        let signature = identity.sign_push(kind, id, &data);
        let status = self
            .http
            .put(url)
            .header(USER_HEADER, identity.user())
            .header(SIGNATURE_HEADER, signature)
            .body(data)
            .send()
            .await?
            .status();
        // 409: the peer already has it
        if status.is_success() || status == StatusCode::CONFLICT {
            Ok(())
        } else {
            Err(self.rejected(status))
        }
    }

    async fn ping(&mut self) -> Result<()> {
        let url = self
            .base
            .join("status")
            .map_err(|e| Error::Internal(e.to_string()))?;
        let status = self.http.get(url).send().await?.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(self.rejected(status))
        }
    }
}
