use std::{process, sync::Arc};

use rasterslot::{
    application::{
        dispatch::Dispatcher,
        error::AppError,
        ingest::{IngestService, RenderRequest},
        pipeline::{PipelineError, PipelineRunner},
        ports::EncodeParams,
    },
    config,
    infra::{
        chromium::ChromiumRasterizer,
        error::InfraError,
        http::{self, HttpState},
        imagemagick::ImageMagickEncoder,
        slots::SlotStore,
        telemetry,
        template::LiquidTemplateRenderer,
    },
};
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
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, args).await,
    }
}

struct ApplicationContext {
    ingest: Arc<IngestService>,
    slots: Arc<SlotStore>,
}

async fn build_application_context(
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let slots = Arc::new(
        SlotStore::open(
            &settings.output,
            settings.encode.format,
            settings.pipeline.lock_scope,
        )
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?,
    );

    let runner = Arc::new(PipelineRunner::new(
        Arc::new(ChromiumRasterizer::new(settings.raster.browser_path.clone())),
        Arc::new(ImageMagickEncoder::new(settings.encode.convert_path.clone())),
        Arc::clone(&slots),
        settings.raster.viewport,
        EncodeParams::from(&settings.encode),
        settings.raster.timeout,
    ));
    let dispatcher = Dispatcher::new(runner, settings.pipeline.max_concurrency.get() as usize);

    let renderer = LiquidTemplateRenderer::new().map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to build template engine: {err}"
        )))
    })?;
    let ingest = Arc::new(IngestService::new(
        &settings.template,
        Arc::new(renderer),
        dispatcher,
    ));

    Ok(ApplicationContext { ingest, slots })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let dispatcher = app.ingest.dispatcher().clone();

    let state = HttpState {
        ingest: app.ingest,
        slots: app.slots,
    };
    let router = http::build_router(state, settings.server.max_body_bytes.get() as usize);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "rasterslot::serve",
        addr = %settings.server.addr,
        lock_scope = ?settings.pipeline.lock_scope,
        max_concurrency = settings.pipeline.max_concurrency.get(),
        "Listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(AppError::Server)?;

    if !dispatcher.drain(settings.server.graceful_shutdown).await {
        warn!(
            target = "rasterslot::serve",
            "Exiting with renders still in flight"
        );
    }
    Ok(())
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let body = tokio::fs::read(&args.data)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let request = RenderRequest::parse(args.key.as_deref(), &body)?;

    let app = build_application_context(&settings).await?;
    let accepted = app.ingest.submit(request).await?;
    let key = accepted.key;
    let artifact = accepted
        .handle
        .await
        .map_err(|_| AppError::from(PipelineError::Aborted))??;

    info!(
        target = "rasterslot::render",
        key = %key,
        bytes = artifact.len(),
        path = %app.slots.artifact_path(&key).display(),
        "Artifact written"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = "rasterslot::serve", error = %err, "Failed to listen for Ctrl-C");
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
                warn!(target = "rasterslot::serve", error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!(target = "rasterslot::serve", "Shutdown signal received");
}
