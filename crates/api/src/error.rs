use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use courier_core::Error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    RateLimited,
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests".to_string(),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Unexpected error".to_string(),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody {
                    code: code.to_string(),
                    message,
                },
            }),
        )
            .into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidChannel(_)
            | Error::InvalidRecipient(_)
            | Error::EmptyRecipient
            | Error::EmptyContent
            | Error::ContentTooLong { .. }
            | Error::InvalidPriority(_)
            | Error::InvalidStatus(_)
            | Error::BatchTooLarge
            | Error::BatchEmpty
            | Error::EmptyTemplateName
            | Error::EmptyTemplateBody
            | Error::InvalidTemplateBody(_)
            | Error::TemplateRenderFailed(_) => ApiError::BadRequest(err.to_string()),

            Error::NotificationNotFound | Error::BatchNotFound | Error::TemplateNotFound => {
                ApiError::NotFound(err.to_string())
            }

            Error::InvalidStatusTransition(_)
            | Error::DuplicateIdempotencyKey
            | Error::DuplicateTemplateName => ApiError::Conflict(err.to_string()),

            Error::ProviderUnavailable(_)
            | Error::CircuitOpen
            | Error::ProviderRejected(_)
            | Error::Database(_)
            | Error::Serialization(_) => {
                tracing::error!(error = %err, "internal error");
                ApiError::Internal
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::response::IntoResponse;

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn validation_errors_are_bad_requests() {
        rt().block_on(async {
            let (status, json) = body_json(Error::EmptyContent.into()).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json["error"]["code"], "invalid_request");
            assert_eq!(json["error"]["message"], "content is required");
        });
    }

    #[test]
    fn render_failure_is_bad_request_but_missing_template_is_not_found() {
        rt().block_on(async {
            let (status, _) =
                body_json(Error::TemplateRenderFailed("undefined variable".into()).into()).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);

            let (status, json) = body_json(Error::TemplateNotFound.into()).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(json["error"]["code"], "not_found");
        });
    }

    #[test]
    fn conflicts_map_to_409() {
        rt().block_on(async {
            let (status, _) =
                body_json(Error::InvalidStatusTransition("delivered".into()).into()).await;
            assert_eq!(status, StatusCode::CONFLICT);

            let (status, _) = body_json(Error::DuplicateIdempotencyKey.into()).await;
            assert_eq!(status, StatusCode::CONFLICT);

            let (status, _) = body_json(Error::DuplicateTemplateName.into()).await;
            assert_eq!(status, StatusCode::CONFLICT);
        });
    }

    #[test]
    fn storage_errors_are_opaque_internals() {
        rt().block_on(async {
            let (status, json) = body_json(Error::Database(sqlx::Error::PoolClosed).into()).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(json["error"]["message"], "Unexpected error");
        });
    }

    #[test]
    fn rate_limited_response() {
        rt().block_on(async {
            let (status, json) = body_json(ApiError::RateLimited).await;
            assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
            assert_eq!(json["error"]["code"], "rate_limited");
        });
    }
}
