use lambda_http::{http::StatusCode, Body, Response};
use serde::Serialize;

use crate::errors::{ApiError, ApiResult};

/// JSON response with the CORS header every route carries
pub fn json<T: Serialize>(status: StatusCode, payload: &T) -> ApiResult<Response<Body>> {
    let body = serde_json::to_string(payload).map_err(|e| ApiError::Internal(e.to_string()))?;

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(body.into())
        .map_err(|e| ApiError::Internal(e.to_string()))
}

pub fn ok<T: Serialize>(payload: &T) -> ApiResult<Response<Body>> {
    json(StatusCode::OK, payload)
}

pub fn created<T: Serialize>(payload: &T) -> ApiResult<Response<Body>> {
    json(StatusCode::CREATED, payload)
}

pub fn preflight() -> ApiResult<Response<Body>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header(
            "Access-Control-Allow-Methods",
            "GET,POST,PUT,DELETE,OPTIONS",
        )
        .header(
            "Access-Control-Allow-Headers",
            "Content-Type,Authorization,X-Amz-Date,X-Api-Key,X-Amz-Security-Token",
        )
        .body(Body::Empty)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Parse a JSON request body, rejecting empty bodies with 400
pub fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("Request body is required".to_string()));
    }
    Ok(serde_json::from_slice(body)?)
}
