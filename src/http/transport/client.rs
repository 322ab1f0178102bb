use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Instant;

use reqwest::Client;
use tracing::{debug, error};

use crate::error::{HttpError, TransferError};
use crate::http::types::{Request, Response, Timing, TransferResult};

use super::convert;
use super::{
    ClientProfile, ProgressCallback, Transport, TransportConfig, TransportFactory, TransferFuture,
    build_proxy,
};

const MAX_PREALLOCATED_BODY: u64 = 1024 * 1024;

fn build_client(config: &TransportConfig, profile: ClientProfile) -> Result<Client, HttpError> {
    let mut builder = Client::builder()
        .user_agent(config.user_agent.as_str())
        .pool_max_idle_per_host(config.max_idle_per_host)
        .connection_verbose(config.verbose)
        .tcp_keepalive(config.tcp_keepalive)
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

/// Builds [`ReqwestTransport`]s sharing one client configuration.
#[derive(Debug, Clone)]
pub struct ReqwestTransportFactory {
    config: TransportConfig,
}

impl ReqwestTransportFactory {
    /// Validates the configuration by building a client once.
    ///
    /// # Errors
    ///
    /// Returns an error when the proxy URL is invalid or the TLS backend
    /// cannot be initialised.
    pub fn new(config: TransportConfig) -> Result<Self, HttpError> {
        build_client(&config, ClientProfile::default())?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl TransportFactory for ReqwestTransportFactory {
    fn create(&self, worker_index: usize) -> Result<Box<dyn Transport>, TransferError> {
        debug!("Creating HTTP transport for worker {}", worker_index);
        Ok(Box::new(ReqwestTransport::new(self.config.clone())))
    }
}

/// Async transport backed by `reqwest`. Keeps one pooled client per
/// redirect/TLS profile so connection reuse survives mixed requests.
pub struct ReqwestTransport {
    config: TransportConfig,
    clients: HashMap<ClientProfile, Client>,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            clients: HashMap::new(),
        }
    }

    fn client_for(&mut self, profile: ClientProfile) -> Result<Client, TransferError> {
        match self.clients.entry(profile) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let client = build_client(&self.config, profile).map_err(|err| {
                    error!("Failed to create HTTP client: {}", err);
                    TransferError::internal(format!("Failed to create HTTP client: {}", err))
                })?;
                Ok(entry.insert(client).clone())
            }
        }
    }
}

impl Transport for ReqwestTransport {
    fn start(
        &mut self,
        id: u64,
        request: &Request,
        progress: Option<ProgressCallback>,
    ) -> Result<TransferFuture, TransferError> {
        let client = self.client_for(ClientProfile::of(request))?;

        let prepared = convert::parse_url(&request.url).and_then(|url| {
            let headers = convert::header_map(request)?;
            let mut builder = client
                .request(convert::method(request.method), url)
                .timeout(request.timeout())
                .headers(headers);
            if let Some(payload) = request.body.payload() {
                builder = builder.body(payload.to_owned());
            }
            Ok(builder)
        });

        Ok(match prepared {
            Ok(builder) => Box::pin(perform(id, builder, progress)),
            Err(err) => Box::pin(std::future::ready(Err(err))),
        })
    }
}

async fn perform(
    id: u64,
    builder: reqwest::RequestBuilder,
    progress: Option<ProgressCallback>,
) -> TransferResult {
    let started = Instant::now();
    let mut response = builder.send().await.map_err(|err| convert::classify(&err))?;
    let first_byte = started.elapsed();

    let status = response.status();
    let headers = convert::response_headers(response.headers());
    let expected = response.content_length().unwrap_or(0);
    let capacity = usize::try_from(expected.min(MAX_PREALLOCATED_BODY)).unwrap_or(0);
    let mut body = Vec::with_capacity(capacity);

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|err| convert::classify(&err))?
    {
        body.extend_from_slice(&chunk);
        if let Some(callback) = progress.as_ref() {
            callback(id, u64::try_from(body.len()).unwrap_or(u64::MAX), expected);
        }
    }

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
