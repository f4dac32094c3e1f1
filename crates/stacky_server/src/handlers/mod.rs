pub mod debug_login;
pub mod reply;

use crate::error::ApiError;

pub async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}
