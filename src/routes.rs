mod execute;
mod executions;

pub use execute::*;
pub use executions::*;

use actix_web::error::{InternalError, JsonPayloadError, QueryPayloadError};
use actix_web::{HttpRequest, HttpResponse, Responder, get, web};
use serde::Serialize;

use crate::sandbox::Pipeline;

#[derive(Serialize)]
struct ErrorResponse {
    reason: &'static str,
    code: u32,
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ErrorResponse {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
    });
    InternalError::from_response(err, response).into()
}

pub fn query_error_handler(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ErrorResponse {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
    });
    InternalError::from_response(err, response).into()
}

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'static str,
    languages: Vec<&'a str>,
}

#[get("/health")]
pub async fn health_handler(pipeline: web::Data<Pipeline>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy",
        languages: pipeline.registry().languages(),
    })
}
