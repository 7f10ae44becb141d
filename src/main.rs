use std::{future::IntoFuture, process, sync::Arc};

use shopfront::{
    application::{
        catalog::CatalogService, compiler::QueryCompiler, error::AppError, repos::DocumentStore,
    },
    cache::CacheConfig,
    config,
    domain::schema::CollectionSchema,
    infra::{
        cache::build_cache_front,
        db::PostgresDocumentStore,
        error::InfraError,
        http::{self, HttpState},
        memory::MemoryDocumentStore,
        telemetry,
    },
};
use tokio::sync::oneshot;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to load configuration: {err}"
        )))
    })?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging)?;
            run_serve(settings).await
        }
        config::Command::Compile(args) => run_compile(&settings, &args),
    }
}

fn run_compile(settings: &config::Settings, args: &config::CompileArgs) -> Result<(), AppError> {
    let compiler = QueryCompiler::new(CollectionSchema::products());
    let request = shopfront::domain::filter::FilterRequest::from_query_str(&args.query)?;
    let descriptor = compiler.compile(&request, settings.catalog.page_size)?;

    println!("descriptor: {}", descriptor.canonical());
    println!("skip: {}", descriptor.skip());
    println!("cache key: {}", settings.catalog.collection.key_for(&descriptor));
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let (store, database) = init_store(&settings).await?;
    let cache_config = CacheConfig::from(&settings.cache);
    let cache = build_cache_front(&cache_config)?;

    let catalog = CatalogService::new(
        store,
        Arc::new(cache),
        QueryCompiler::new(CollectionSchema::products()),
        settings.catalog.collection.clone(),
        settings.catalog.page_size,
        cache_config.ttl,
    );

    let mut state = HttpState::new(Arc::new(catalog));
    if let Some(database) = database {
        state = state.with_database(database);
    }

    serve_http(&settings, state).await
}

async fn init_store(
    settings: &config::Settings,
) -> Result<(Arc<dyn DocumentStore>, Option<PostgresDocumentStore>), AppError> {
    let schema = CollectionSchema::products();
    let collection = settings.catalog.collection.as_str();

    if let Some(url) = settings.database.url.as_deref() {
        let pool = PostgresDocumentStore::connect(
            url,
            settings.database.max_connections.get(),
            settings.database.statement_timeout,
        )
        .await
        .map_err(InfraError::from)?;
        PostgresDocumentStore::run_migrations(&pool)
            .await
            .map_err(InfraError::from)?;
        info!(collection, "Using postgres document store");

        let store = PostgresDocumentStore::new(pool, collection, schema);
        return Ok((Arc::new(store.clone()), Some(store)));
    }

    let store = match settings.catalog.seed_file.as_ref() {
        Some(path) => MemoryDocumentStore::from_json_file(schema, path).await?,
        None => MemoryDocumentStore::empty(schema),
    };
    info!(collection, "Using in-memory document store");
    Ok((Arc::new(store), None))
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(addr = %settings.server.addr, "Catalog service listening");

    let (stopping_tx, stopping_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = stopping_tx.send(());
        })
        .into_future();

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::from(InfraError::server(err.to_string())))?;
        }
        _ = async {
            if stopping_rx.await.is_ok() {
                tokio::time::sleep(grace).await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {
            warn!(grace_seconds = grace.as_secs(), "Graceful shutdown timed out; dropping open connections");
        }
    }

    info!("Catalog service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received; draining connections");
}
