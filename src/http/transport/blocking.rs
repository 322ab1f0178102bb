use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use reqwest::blocking::Client;
use tracing::error;

use crate::error::{HttpError, TransferError};
use crate::http::types::{Request, Response, Timing, TransferResult};

use super::convert;
use super::{ClientProfile, TransportConfig, build_proxy};

fn build_client(config: &TransportConfig, profile: ClientProfile) -> Result<Client, HttpError> {
    let mut builder = Client::builder()
        .user_agent(config.user_agent.as_str())
        .pool_max_idle_per_host(config.max_idle_per_host)
        .tcp_keepalive(config.tcp_keepalive)
        .timeout(None)
        .redirect(profile.redirect_policy());

    if !profile.verify_ssl {
        builder = builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }

    if let Some(proxy) = build_proxy(config)? {
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|source| HttpError::BuildClientFailed { source })
}

/// Synchronous transport used by the thread pool. Safe to share between
/// threads; clients are created lazily per profile and cloned out.
///
/// Must not be created or used from inside an async runtime.
pub struct BlockingTransport {
    config: TransportConfig,
    clients: Mutex<HashMap<ClientProfile, Client>>,
}

impl BlockingTransport {
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, profile: ClientProfile) -> Result<Client, TransferError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&profile) {
            return Ok(client.clone());
        }
        let client = build_client(&self.config, profile).map_err(|err| {
            error!("Failed to create blocking HTTP client: {}", err);
            TransferError::internal(format!("Failed to create HTTP client: {}", err))
        })?;
        clients.insert(profile, client.clone());
        Ok(client)
    }

    /// Performs one request to completion on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns the classified transfer error when the request fails.
    pub fn execute(&self, request: &Request) -> TransferResult {
        let client = self.client_for(ClientProfile::of(request))?;
        let url = convert::parse_url(&request.url)?;
        let headers = convert::header_map(request)?;

        let mut builder = client
            .request(convert::method(request.method), url)
            .timeout(request.timeout())
            .headers(headers);
        if let Some(payload) = request.body.payload() {
            builder = builder.body(payload.to_owned());
        }

        let started = Instant::now();
        let response = builder.send().map_err(|err| convert::classify(&err))?;
        let first_byte = started.elapsed();

        let status = response.status();
        let headers = convert::response_headers(response.headers());
        let body = response
            .bytes()
            .map_err(|err| convert::classify(&err))?
            .to_vec();
        let total = started.elapsed();

        Ok(Response {
            status_code: status.as_u16(),
            status_text: convert::status_text(status),
            headers,
            body_size: body.len(),
            body,
            timing: Timing {
                total_ms: convert::millis(total),
                first_byte_ms: convert::millis(first_byte),
                download_ms: convert::millis(total.saturating_sub(first_byte)),
                ..Timing::default()
            },
        })
    }
}
