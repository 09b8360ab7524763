use crate::local_ip::local_ip_for;
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use rsa::RsaPublicKey;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use vitals_common::envelope::{
    self, ENCRYPTION_HEADER, ENCRYPTION_SCHEME, HASH_HEADER, REAL_IP_HEADER,
};
use vitals_common::model::MetricPayload;
use vitals_common::retry::Retrier;

const POST_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends batches as JSON arrays to `<address>/updates/`.
///
/// The body is transformed before signing so the `HashSHA256` header always
/// covers the bytes on the wire: gzip when no public key is configured, RSA
/// encryption otherwise.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    local_ip: IpAddr,
    secret_key: Option<Vec<u8>>,
    public_key: Option<RsaPublicKey>,
    retrier: Retrier<TransportError>,
}

fn is_retryable(err: &TransportError) -> bool {
    match err {
        TransportError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        TransportError::BadStatus(status) => *status >= 500,
        _ => false,
    }
}

impl HttpTransport {
    pub fn new(
        address: &str,
        secret_key: Option<&str>,
        crypto_key: Option<&Path>,
    ) -> Result<Self, TransportError> {
        let url = reqwest::Url::parse(address)
            .map_err(|e| TransportError::Endpoint(format!("{address}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| TransportError::Endpoint(format!("{address}: missing host")))?;
        let local_ip = local_ip_for(host)?;

        let public_key = crypto_key.map(envelope::load_public_key).transpose()?;

        let client = reqwest::Client::builder().timeout(POST_TIMEOUT).build()?;

        // Exponentially growing waits, each capped at the post timeout.
        let retrier = Retrier::new(is_retryable).with_backoff(vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
        ]);

        Ok(Self {
            client,
            endpoint: format!("{}/updates/", address.trim_end_matches('/')),
            local_ip,
            secret_key: secret_key.map(|k| k.as_bytes().to_vec()),
            public_key,
            retrier,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_batch(&self, batch: &[MetricPayload]) -> Result<(), TransportError> {
        let plain = serde_json::to_vec(batch)?;

        let (body, encrypted) = match &self.public_key {
            Some(key) => (envelope::encrypt(key, &plain)?, true),
            None => (envelope::compress(&plain)?, false),
        };

        let signature = self
            .secret_key
            .as_deref()
            .map(|key| envelope::sign(key, &body));

        self.retrier
            .run(|| {
                let body = body.clone();
                let signature = signature.clone();
                async move {
                    let mut request = self
                        .client
                        .post(&self.endpoint)
                        .header(CONTENT_TYPE, "application/json")
                        .header(REAL_IP_HEADER, self.local_ip.to_string());

                    request = if encrypted {
                        request.header(ENCRYPTION_HEADER, ENCRYPTION_SCHEME)
                    } else {
                        request.header(CONTENT_ENCODING, "gzip")
                    };

                    if let Some(signature) = &signature {
                        request = request.header(HASH_HEADER, signature.as_str());
                    }

                    let response = request.body(body).send().await?;
                    if !response.status().is_success() {
                        return Err(TransportError::BadStatus(response.status().as_u16()));
                    }

                    Ok(())
                }
            })
            .await
            .map_err(|e| e.into_inner())
    }
}
