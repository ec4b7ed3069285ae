// API routes and handlers
use crate::error::GatewayError;
use crate::logsink::LogRecord;
use crate::registry::{ModelEntry, ModelId, Task};
use crate::state::AppState;
use actix_web::http::Method;
use actix_web::{get, route, web, HttpRequest, HttpResponse};
use log::{info, warn};
use serde::Serialize;

#[derive(Serialize)]
struct TranslationResponse {
    translated_text: String,
}

#[derive(Serialize)]
struct SummaryResponse {
    summary: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: String,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    request_id: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(translate)
        .service(summarize)
        .service(translate_status)
        .service(summarize_status);
}

fn is_probe(req: &HttpRequest) -> bool {
    req.method() == Method::HEAD || req.method() == Method::OPTIONS
}

/// Pulls the `text` field out of a raw JSON body. A missing or unparseable
/// body and a missing or empty field are distinct client errors; neither is
/// coerced into the other.
fn extract_text(body: &web::Bytes) -> Result<String, GatewayError> {
    if body.is_empty() {
        return Err(GatewayError::MissingBody);
    }
    let data: serde_json::Value =
        serde_json::from_slice(body).map_err(|_| GatewayError::MissingBody)?;
    match data.get("text").and_then(|v| v.as_str()) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(GatewayError::MissingText),
    }
}

fn check_ready(entry: &ModelEntry) -> Result<(), GatewayError> {
    if entry.is_ready() {
        Ok(())
    } else {
        warn!("{} requested but not ready: {:?}", entry.id(), entry.state());
        Err(GatewayError::NotReady(entry.id()))
    }
}

#[route("/translate/{direction}", method = "POST", method = "HEAD", method = "OPTIONS")]
async fn translate(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    // Probes succeed before any validation or model access.
    if is_probe(&req) {
        return Ok(HttpResponse::Ok().finish());
    }

    let direction = path.into_inner();
    let unknown = || {
        GatewayError::UnknownDirection(
            state
                .registry
                .translation_directions()
                .iter()
                .map(ToString::to_string)
                .collect(),
        )
    };
    let id = direction
        .parse::<ModelId>()
        .ok()
        .filter(|id| id.task() == Task::Translation)
        .ok_or_else(unknown)?;
    let entry = state.registry.get(id).ok_or_else(unknown)?;
    check_ready(entry)?;

    let text = extract_text(&body)?;
    info!("Received text for {id} translation: {text:.100}");

    let translated_text = state.executor.infer(entry, text.clone()).await?;
    info!("Translation successful. Result: {translated_text:.100}");

    if let Some(log) = &state.request_log {
        log.record(LogRecord::new(None, id, &text, &translated_text));
    }
    Ok(HttpResponse::Ok().json(TranslationResponse { translated_text }))
}

#[route("/summarize", method = "POST", method = "HEAD", method = "OPTIONS")]
async fn summarize(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    if is_probe(&req) {
        return Ok(HttpResponse::Ok().finish());
    }

    let id = ModelId::Summarize;
    let entry = state.registry.get(id).ok_or(GatewayError::NotReady(id))?;
    check_ready(entry)?;

    let text = extract_text(&body)?;
    info!("Received text for summarization: {text:.100}");

    let summary = state.executor.infer(entry, text.clone()).await?;
    info!("Summarization successful. Result: {summary:.100}");

    if let Some(log) = &state.request_log {
        log.record(LogRecord::new(None, id, &text, &summary));
    }
    Ok(HttpResponse::Ok().json(SummaryResponse { summary }))
}

/// Reports whether every configured model is ready, from live registry
/// state. Degraded deployments answer 503 here while still serving the
/// models that did load.
#[route("/health", method = "GET", method = "HEAD")]
async fn health(state: web::Data<AppState>) -> HttpResponse {
    let not_ready = state.registry.not_ready();
    if not_ready.is_empty() {
        HttpResponse::Ok().json(HealthResponse {
            status: "healthy",
            message: "Service is running".to_string(),
        })
    } else {
        let names: Vec<&str> = not_ready.iter().map(|id| id.as_str()).collect();
        HttpResponse::ServiceUnavailable().json(HealthResponse {
            status: "error",
            message: format!("Models not ready: {}", names.join(", ")),
        })
    }
}

/// Placeholder for asynchronous job tracking: always answers "In Progress"
/// without consulting any job state. Nothing should be inferred from it.
#[get("/translate/{direction}/status/{id}")]
async fn translate_status(path: web::Path<(String, String)>) -> HttpResponse {
    let (_, request_id) = path.into_inner();
    HttpResponse::Ok().json(StatusResponse {
        status: "In Progress",
        request_id,
    })
}

/// Same placeholder as [`translate_status`], bound to the summarize task.
#[get("/summarize/status/{id}")]
async fn summarize_status(path: web::Path<String>) -> HttpResponse {
    HttpResponse::Ok().json(StatusResponse {
        status: "In Progress",
        request_id: path.into_inner(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_body_and_missing_field_stay_distinct() {
        let empty = web::Bytes::from_static(b"");
        assert!(matches!(
            extract_text(&empty),
            Err(GatewayError::MissingBody)
        ));

        let not_json = web::Bytes::from_static(b"plain text");
        assert!(matches!(
            extract_text(&not_json),
            Err(GatewayError::MissingBody)
        ));

        let no_field = web::Bytes::from_static(b"{\"other\": 1}");
        assert!(matches!(
            extract_text(&no_field),
            Err(GatewayError::MissingText)
        ));

        let empty_field = web::Bytes::from_static(b"{\"text\": \"\"}");
        assert!(matches!(
            extract_text(&empty_field),
            Err(GatewayError::MissingText)
        ));
    }

    #[test]
    fn extract_text_returns_the_field() {
        let body = web::Bytes::from_static(b"{\"text\": \"hello\"}");
        assert_eq!(extract_text(&body).unwrap(), "hello");
    }
}
