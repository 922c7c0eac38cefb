use std::collections::BTreeMap;

use serde_json::json;
use tracing::error;
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::{reply, Rejection};

use crate::errors::ServerError;

pub type EndpointResult<T> = Result<T, Rejection>;

/// Validation errors keyed by field name, serialized as the 400 body.
pub type FieldErrors = BTreeMap<&'static str, Vec<String>>;

/// Logs the failure and answers with a JSON 500. Provisioning, loading and
/// storage errors end a request here instead of crashing the process.
pub fn server_err_proc(e: &ServerError) -> EndpointResult<WithStatus<Json>> {
    error!(error = %e, "request failed");
    Ok(reply::with_status(
        reply::json(&json!({ "error": e.to_string() })),
        StatusCode::INTERNAL_SERVER_ERROR,
    ))
}

pub fn field_errors_reply(errors: &FieldErrors) -> WithStatus<Json> {
    reply::with_status(reply::json(errors), StatusCode::BAD_REQUEST)
}

pub fn single_field_error(field: &'static str, message: &str) -> WithStatus<Json> {
    let mut errors = FieldErrors::new();
    errors.insert(field, vec![message.to_owned()]);
    field_errors_reply(&errors)
}
