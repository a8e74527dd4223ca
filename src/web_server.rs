use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware, web};
use sqlx::sqlite::SqlitePool;

use crate::config::ServerConfig;
use crate::reporter::Reporter;
use crate::routes::{
    get_executions_handler, health_handler, json_error_handler, post_execute_handler,
    query_error_handler,
};
use crate::sandbox::Pipeline;

pub fn build_server(
    server_config: ServerConfig,
    pipeline: Arc<Pipeline>,
    reporter: Arc<Reporter>,
    db_pool: Arc<SqlitePool>,
) -> std::io::Result<Server> {
    let pipeline = web::Data::from(pipeline);
    let reporter = web::Data::from(reporter);
    let db_pool = web::Data::from(db_pool);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(pipeline.clone())
            .app_data(reporter.clone())
            .app_data(db_pool.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .wrap(middleware::Logger::default())
            .service(post_execute_handler)
            .service(get_executions_handler)
            .service(health_handler)
    })
    .bind(server_config.bind())?
    .run();

    Ok(server)
}
