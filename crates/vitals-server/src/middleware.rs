use crate::subnet::TrustedSubnet;
use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rsa::RsaPrivateKey;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;
use vitals_common::envelope::{self, ENCRYPTION_HEADER, HASH_HEADER, REAL_IP_HEADER};

/// Shared keys for the body-envelope middlewares. A middleware whose key is
/// not configured passes requests through untouched.
#[derive(Clone, Default)]
pub struct Envelopes {
    pub secret_key: Option<Arc<Vec<u8>>>,
    pub private_key: Option<Arc<RsaPrivateKey>>,
}

/// Structured access log: method, path, status, response size, duration.
pub async fn access_log(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let remote_ip = req
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let response = next.run(req).await;

    let status = response.status();
    let (parts, body) = response.into_parts();
    let body_bytes = to_bytes(body, usize::MAX).await.unwrap_or_default();

    tracing::info!(
        %method,
        %path,
        status = status.as_u16(),
        resp_size = body_bytes.len(),
        duration = ?start.elapsed(),
        remote_ip = %remote_ip,
        "request completed"
    );

    Response::from_parts(parts, Body::from(body_bytes))
}

/// Rejects mutating requests from outside the trusted CIDR: 400 when the
/// `X-Real-IP` header is missing or unparsable, 403 for non-members.
pub async fn subnet_gate(
    State(subnet): State<Option<TrustedSubnet>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(subnet) = subnet else {
        return next.run(req).await;
    };

    let header = req
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok());

    let Some(raw) = header else {
        tracing::warn!("request rejected: X-Real-IP header missing");
        return (StatusCode::BAD_REQUEST, "X-Real-IP header missing").into_response();
    };

    let Ok(ip) = raw.parse::<Ipv4Addr>() else {
        tracing::warn!(header = raw, "request rejected: invalid X-Real-IP");
        return (StatusCode::BAD_REQUEST, "invalid X-Real-IP header").into_response();
    };

    if !subnet.contains(ip) {
        tracing::warn!(ip = %ip, "request rejected: address outside trusted subnet");
        return (StatusCode::FORBIDDEN, "access denied").into_response();
    }

    next.run(req).await
}

/// Verifies the `HashSHA256` signature over the raw request body. The body is
/// restored for downstream readers. Runs before decryption so the signature
/// covers the bytes on the wire.
pub async fn verify_checksum(
    State(envelopes): State<Envelopes>,
    req: Request,
    next: Next,
) -> Response {
    let Some(key) = &envelopes.secret_key else {
        return next.run(req).await;
    };

    let Some(header) = req
        .headers()
        .get(HASH_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        tracing::warn!("request rejected: checksum header missing");
        return (StatusCode::BAD_REQUEST, "checksum header missing").into_response();
    };

    let (parts, body) = req.into_parts();
    let Ok(body_bytes) = to_bytes(body, usize::MAX).await else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to read body").into_response();
    };

    if !envelope::verify(key, &body_bytes, &header) {
        tracing::warn!("request rejected: invalid checksum");
        return (StatusCode::BAD_REQUEST, "invalid request checksum").into_response();
    }

    let req = Request::from_parts(parts, Body::from(body_bytes));
    next.run(req).await
}

/// Decrypts bodies marked with `X-Encrypted` using the configured private
/// key, then strips the marker for downstream readers.
pub async fn decrypt_request(
    State(envelopes): State<Envelopes>,
    req: Request,
    next: Next,
) -> Response {
    if req.headers().get(ENCRYPTION_HEADER).is_none() {
        return next.run(req).await;
    }

    let Some(key) = &envelopes.private_key else {
        return next.run(req).await;
    };

    let (mut parts, body) = req.into_parts();
    let Ok(body_bytes) = to_bytes(body, usize::MAX).await else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to read body").into_response();
    };

    parts.headers.remove(ENCRYPTION_HEADER);

    if body_bytes.is_empty() {
        tracing::warn!("empty encrypted body received");
        let req = Request::from_parts(parts, Body::empty());
        return next.run(req).await;
    }

    let decrypted = match envelope::decrypt(key, &body_bytes) {
        Ok(decrypted) => decrypted,
        Err(e) => {
            tracing::warn!(error = %e, "failed to decrypt body");
            return (StatusCode::BAD_REQUEST, "failed to decrypt body").into_response();
        }
    };

    set_content_length(&mut parts.headers, decrypted.len());
    let req = Request::from_parts(parts, Body::from(decrypted));
    next.run(req).await
}

/// Gunzips bodies sent with `Content-Encoding: gzip`, then strips the header
/// for downstream readers.
pub async fn decompress_request(req: Request, next: Next) -> Response {
    let is_gzip = req
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));

    if !is_gzip {
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let Ok(body_bytes) = to_bytes(body, usize::MAX).await else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to read body").into_response();
    };

    parts.headers.remove(header::CONTENT_ENCODING);

    if body_bytes.is_empty() {
        tracing::warn!("empty compressed body received");
        let req = Request::from_parts(parts, Body::empty());
        return next.run(req).await;
    }

    let decompressed = match envelope::decompress(&body_bytes) {
        Ok(decompressed) => decompressed,
        Err(e) => {
            tracing::warn!(error = %e, "failed to decompress body");
            return (StatusCode::BAD_REQUEST, "failed to decompress body").into_response();
        }
    };

    set_content_length(&mut parts.headers, decompressed.len());
    let req = Request::from_parts(parts, Body::from(decompressed));
    next.run(req).await
}

fn set_content_length(headers: &mut axum::http::HeaderMap, len: usize) {
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::middleware::{from_fn, from_fn_with_state};
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    async fn echo(body: String) -> String {
        body
    }

    fn subnet_app(subnet: Option<TrustedSubnet>) -> Router {
        Router::new()
            .route("/", post(echo))
            .layer(from_fn_with_state(subnet, subnet_gate))
    }

    fn request(headers: &[(&str, &str)], body: &[u8]) -> Request {
        let mut builder = Request::builder().method("POST").uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::from(body.to_vec())).unwrap()
    }

    #[tokio::test]
    async fn subnet_gate_passes_members_through() {
        let subnet: TrustedSubnet = "10.0.0.0/8".parse().unwrap();
        let app = subnet_app(Some(subnet));

        let resp = app
            .oneshot(request(&[(REAL_IP_HEADER, "10.1.2.3")], b"ok"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn subnet_gate_missing_or_invalid_header_is_bad_request() {
        let subnet: TrustedSubnet = "10.0.0.0/8".parse().unwrap();

        let resp = subnet_app(Some(subnet))
            .oneshot(request(&[], b"ok"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = subnet_app(Some(subnet))
            .oneshot(request(&[(REAL_IP_HEADER, "not-an-ip")], b"ok"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn subnet_gate_rejects_non_members() {
        let subnet: TrustedSubnet = "10.0.0.0/8".parse().unwrap();
        let resp = subnet_app(Some(subnet))
            .oneshot(request(&[(REAL_IP_HEADER, "192.168.1.1")], b"ok"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn subnet_gate_disabled_passes_everything() {
        let resp = subnet_app(None).oneshot(request(&[], b"ok")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    fn checksum_app(secret: &[u8]) -> Router {
        let envelopes = Envelopes {
            secret_key: Some(Arc::new(secret.to_vec())),
            private_key: None,
        };
        Router::new()
            .route("/", post(echo))
            .layer(from_fn_with_state(envelopes, verify_checksum))
    }

    #[tokio::test]
    async fn checksum_accepts_valid_signature_and_restores_body() {
        let body = b"signed payload";
        let signature = envelope::sign(b"secret", body);

        let resp = checksum_app(b"secret")
            .oneshot(request(&[(HASH_HEADER, signature.as_str())], body))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let echoed = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&echoed[..], body);
    }

    #[tokio::test]
    async fn checksum_missing_header_is_bad_request() {
        let resp = checksum_app(b"secret")
            .oneshot(request(&[], b"body"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn checksum_mismatch_is_bad_request() {
        let signature = envelope::sign(b"secret", b"original");
        let resp = checksum_app(b"secret")
            .oneshot(request(&[(HASH_HEADER, signature.as_str())], b"tampered"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn decompress_reconstructs_the_body_exactly() {
        let app = Router::new()
            .route("/", post(echo))
            .layer(from_fn(decompress_request));

        let body = br#"[{"id":"hits","type":"counter","delta":5}]"#;
        let packed = envelope::compress(body).unwrap();

        let resp = app
            .oneshot(request(&[("content-encoding", "gzip")], &packed))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let echoed = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&echoed[..], body);
    }

    #[tokio::test]
    async fn decompress_rejects_garbage() {
        let app = Router::new()
            .route("/", post(echo))
            .layer(from_fn(decompress_request));

        let resp = app
            .oneshot(request(&[("content-encoding", "gzip")], b"junk"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn decrypt_unwraps_the_body_and_strips_the_marker() {
        let mut rng = rand::thread_rng();
        let private = rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public = rsa::RsaPublicKey::from(&private);

        let envelopes = Envelopes {
            secret_key: None,
            private_key: Some(Arc::new(private)),
        };
        let app = Router::new()
            .route("/", post(echo))
            .layer(from_fn_with_state(envelopes, decrypt_request));

        let body = b"secret metrics";
        let ciphertext = envelope::encrypt(&public, body).unwrap();

        let resp = app
            .oneshot(request(&[(ENCRYPTION_HEADER, "rsa")], &ciphertext))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let echoed = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&echoed[..], body);
    }

    #[tokio::test]
    async fn decrypt_garbage_is_bad_request() {
        let mut rng = rand::thread_rng();
        let private = rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap();

        let envelopes = Envelopes {
            secret_key: None,
            private_key: Some(Arc::new(private)),
        };
        let app = Router::new()
            .route("/", post(echo))
            .layer(from_fn_with_state(envelopes, decrypt_request));

        let resp = app
            .oneshot(request(&[(ENCRYPTION_HEADER, "rsa")], b"not ciphertext"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
