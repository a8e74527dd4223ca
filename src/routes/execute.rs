use actix_web::{HttpRequest, HttpResponse, Responder, post, web};
use serde::Deserialize;

use crate::reporter::Reporter;
use crate::sandbox::{ExecutionRequest, Pipeline};

/// Header carrying the caller identity, already authenticated upstream
pub const CALLER_HEADER: &str = "X-User-Id";
pub const ANONYMOUS_CALLER: &str = "anonymous";

#[derive(Deserialize, Debug)]
pub struct ExecuteBody {
    pub code: String,
    pub language: String,
    pub input: Option<String>,
}

#[post("/api/execute")]
pub async fn post_execute_handler(
    req: HttpRequest,
    pipeline: web::Data<Pipeline>,
    reporter: web::Data<Reporter>,
    body: web::Json<ExecuteBody>,
) -> impl Responder {
    let ExecuteBody {
        code,
        language,
        input,
    } = body.into_inner();
    let request = ExecutionRequest {
        caller: caller_identity(&req),
        language,
        code,
        input,
    };
    log::debug!(
        "Execution request from {} for {}",
        request.caller,
        request.language
    );

    // Dropping this future on disconnect kills the child and releases the workspace
    let outcome = pipeline.execute(&request).await;

    HttpResponse::Ok().json(reporter.report(&request, outcome))
}

fn caller_identity(req: &HttpRequest) -> String {
    req.headers()
        .get(CALLER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(ANONYMOUS_CALLER)
        .to_string()
}
