use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use coderun::config::{CliArgs, Config};
use coderun::database as db;
use coderun::queue::UsageQueue;
use coderun::reporter::Reporter;
use coderun::sandbox::{Pipeline, ProcessRunner, Registry, prepare_root};
use coderun::web_server::build_server;
use coderun::worker::usage_recorder;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let Config {
        server: server_config,
        sandbox: sandbox_config,
        languages,
    } = cli.to_config().expect("Failed to load configuration");

    let registry = Arc::new(Registry::builtin().with_overrides(languages));
    log::info!("Supported languages: {}", registry.languages().join(", "));

    let sandbox_root = sandbox_config
        .root()
        .expect("Failed to resolve sandbox root");
    prepare_root(&sandbox_root).expect("Failed to prepare sandbox root");
    log::info!("Workspaces live under {}", sandbox_root.display());

    let db_path = db::get_db_path();
    if cli.flush_data {
        db::remove_db(&db_path);
    }
    let db_pool = Arc::new(
        db::init_db(&db_path)
            .await
            .expect("Failed to initialize database"),
    );

    let pipeline = Arc::new(Pipeline::new(
        registry,
        sandbox_root,
        ProcessRunner::new(sandbox_config.max_output_bytes()),
    ));
    let usage_queue = Arc::new(UsageQueue::new());
    let reporter = Arc::new(Reporter::new(usage_queue.clone()));
    let shutdown_token = CancellationToken::new();

    // ======= PREPARATION END, EXECUTION START =======

    let mut recorder = tokio::spawn(usage_recorder(
        db_pool.clone(),
        usage_queue,
        shutdown_token.clone(),
    ));

    let server = build_server(server_config, pipeline, reporter, db_pool)?;
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    let mut recorder_done = false;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
        res_recorder = &mut recorder => {
            recorder_done = true;
            log::error!("Usage recorder terminated unexpectedly: {:?}", res_recorder);
        }
    }

    // 1. Stop accepting requests; in-flight executions finish and clean up
    server_handle.stop(true).await;

    // 2. Let the recorder flush what the last requests queued
    shutdown_token.cancel();
    if !recorder_done {
        match recorder.await {
            Ok(Err(e)) => log::error!("Usage recorder finished with error: {e:?}"),
            Err(e) if e.is_panic() => log::error!("Usage recorder panicked: {e:?}"),
            Err(e) => log::error!("Usage recorder handle finished with error: {e:?}"),
            Ok(Ok(())) => {}
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}
