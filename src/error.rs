// Error taxonomy and its HTTP mapping
use crate::registry::{ModelId, Task};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

/// Everything that can go wrong between accepting a request and producing
/// output text. Validation variants are raised by the router before the
/// executor runs; `Backend` and `Timeout` come out of the executor.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Request body was absent or not parseable as JSON.
    #[error("No data provided")]
    MissingBody,
    /// Body parsed but the `text` field was absent or empty.
    #[error("No text provided")]
    MissingText,
    /// Path named a direction that is not a registered translation model.
    #[error("Invalid translation direction. Use one of: {0:?}")]
    UnknownDirection(Vec<String>),
    /// The model is configured but not in the Ready state.
    #[error("Model not loaded. Please try again later.")]
    NotReady(ModelId),
    /// The generator returned an error; detail is surfaced to the caller.
    #[error("{task:?} failed: {detail}")]
    Backend { task: Task, detail: String },
    /// Inference exceeded the configured bound. Kept distinct from
    /// `Backend` so timeouts are observable as such.
    #[error("Inference timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MissingBody
            | GatewayError::MissingText
            | GatewayError::UnknownDirection(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Backend { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(GatewayError::MissingBody.status_code(), 400);
        assert_eq!(GatewayError::MissingText.status_code(), 400);
        assert_eq!(
            GatewayError::UnknownDirection(vec!["ar2en".into()]).status_code(),
            400
        );
        assert_eq!(GatewayError::NotReady(ModelId::En2ar).status_code(), 503);
        assert_eq!(
            GatewayError::Backend {
                task: Task::Translation,
                detail: "oom".into()
            }
            .status_code(),
            500
        );
        assert_eq!(GatewayError::Timeout { seconds: 30 }.status_code(), 504);
    }

    #[test]
    fn backend_message_names_the_task() {
        let err = GatewayError::Backend {
            task: Task::Summarization,
            detail: "tensor shape mismatch".into(),
        };
        assert_eq!(err.to_string(), "Summarization failed: tensor shape mismatch");
    }

    #[test]
    fn unknown_direction_enumerates_options() {
        let err = GatewayError::UnknownDirection(vec!["ar2en".into(), "en2ar".into()]);
        let message = err.to_string();
        assert!(message.contains("ar2en"));
        assert!(message.contains("en2ar"));
    }
}
