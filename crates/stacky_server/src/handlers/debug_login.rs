use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stacky_logging::{stacky_error, stacky_info};

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
struct LoginBody {
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
}

/// Equal-length digests, so the comparison does not leak the secret's length.
fn passwords_match(submitted: &str, secret: &str) -> bool {
    Sha256::digest(submitted.as_bytes()) == Sha256::digest(secret.as_bytes())
}

fn client_address(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
}

pub async fn debug_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<LoginResponse>, ApiError> {
    let Some(secret) = state.config.debug_password.as_deref() else {
        stacky_error!("DEBUG_PASSWORD environment variable not set");
        return Err(ApiError::internal("Debug not configured"));
    };

    let password = serde_json::from_slice::<LoginBody>(&body)
        .ok()
        .and_then(|body| body.password)
        .filter(|password| !password.is_empty())
        .ok_or_else(|| ApiError::bad_request("Password required"))?;

    if passwords_match(&password, secret) {
        stacky_info!("Debug access granted from {}", client_address(&headers));
        Ok(Json(LoginResponse {
            success: true,
            message: "Debug access granted".to_string(),
        }))
    } else {
        stacky_info!("Debug access denied from {}", client_address(&headers));
        Err(ApiError::unauthorized("Invalid password"))
    }
}
