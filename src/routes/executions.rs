use actix_web::{HttpResponse, Responder, get, web};
use serde::Deserialize;
use sqlx::sqlite::SqlitePool;

use super::ErrorResponse;
use crate::database as db;

#[derive(Deserialize, Debug, Default)]
pub struct UsageQueryParams {
    pub caller: Option<String>,
    pub language: Option<String>,
    pub success: Option<bool>,
    pub limit: Option<u32>,
}

#[get("/api/executions")]
pub async fn get_executions_handler(
    pool: web::Data<SqlitePool>,
    query: web::Query<UsageQueryParams>,
) -> impl Responder {
    match db::fetch_usage_by_query(&query, pool.into_inner()).await {
        Ok(records) => {
            log::info!("Got {} usage records", records.len());
            HttpResponse::Ok().json(records)
        }
        Err(e) => {
            log::error!("Failed to retrieve usage records: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}
