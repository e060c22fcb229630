//! services/api/src/web/extract.rs
//!
//! Request extractors whose rejections use the `{ error, code }` body instead of
//! axum's plain-text defaults.

use crate::error::ApiFailure;
use axum::extract::{FromRequest, FromRequestParts};

/// A JSON request body. Malformed or mistyped bodies are `invalid_input`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiFailure))]
pub struct ApiJson<T>(pub T);

/// Query-string parameters. Unparseable values are `invalid_input`.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiFailure))]
pub struct ApiQuery<T>(pub T);
