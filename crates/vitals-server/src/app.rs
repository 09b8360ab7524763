use crate::handlers;
use crate::middleware::{
    access_log, decompress_request, decrypt_request, subnet_gate, verify_checksum, Envelopes,
};
use crate::state::AppState;
use crate::subnet::TrustedSubnet;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use rsa::RsaPrivateKey;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;

/// Per-deployment toggles for the receive-side envelope chain.
#[derive(Default)]
pub struct RouterOptions {
    pub secret_key: Option<Vec<u8>>,
    pub private_key: Option<RsaPrivateKey>,
    pub trusted_subnet: Option<TrustedSubnet>,
}

/// Builds the HTTP app. Per-request order, outermost first: access log,
/// subnet gate, response compression, checksum verification (batch route
/// only), decryption, decompression, handler.
pub fn build_router(state: AppState, options: RouterOptions) -> Router {
    let envelopes = Envelopes {
        secret_key: options.secret_key.map(Arc::new),
        private_key: options.private_key.map(Arc::new),
    };

    let batch = Router::new()
        .route("/updates/", post(handlers::update_batch))
        .layer(from_fn(decompress_request))
        .layer(from_fn_with_state(envelopes.clone(), decrypt_request))
        .layer(from_fn_with_state(envelopes.clone(), verify_checksum));

    let api = Router::new()
        .route("/", get(handlers::root))
        .route("/ping", get(handlers::ping))
        .route("/value/", post(handlers::value_json))
        .route("/value/{kind}/{name}", get(handlers::value_path))
        .route("/update/", post(handlers::update_json))
        .route("/update/{kind}/{name}/{value}", post(handlers::update_path))
        .layer(from_fn(decompress_request))
        .layer(from_fn_with_state(envelopes, decrypt_request));

    api.merge(batch)
        .with_state(state)
        .layer(CompressionLayer::new())
        .layer(from_fn_with_state(options.trusted_subnet, subnet_gate))
        .layer(from_fn(access_log))
}
