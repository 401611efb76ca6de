use std::{process, sync::Arc};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_cron::CronStream;
use serde::Serialize;
use tidemark::{
    application::{
        clock::SystemClock,
        context::{TemporalAdapters, TemporalContext},
        error::{AppError, TemporalError, error_chain},
        harmonize::Harmonizer,
        jobs::{
            BatchReport, TransitionBatchTaskBuilder, process_transition_scan_job,
            transition_scan_schedule,
        },
        lifetime::LifetimeRequest,
        repos::CacheTagSink,
    },
    config::{self, HarmonizeArgs, LifetimeArgs, ScopeArgs},
    domain::UnixTimestamp,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        purge::{HttpPurgeSink, TracingTagSink},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let chain = error_chain(error);
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?chain, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?chain, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    let command = cli_args.command.unwrap_or(config::Command::Run);

    telemetry::init(&settings.logging)?;

    if settings.scheduler.was_clamped() {
        warn!(
            target = "config",
            requested_seconds = settings.scheduler.requested_seconds,
            interval_seconds = settings.scheduler.interval.as_secs(),
            "scheduler interval raised to the minimum"
        );
    }

    match command {
        config::Command::Run => run_scheduler(build_context(settings).await?).await,
        config::Command::Scan => run_scan(&build_context(settings).await?).await,
        config::Command::NextTransition(scope) => {
            run_next_transition(&build_context(settings).await?, scope).await
        }
        config::Command::Lifetime(args) => {
            run_lifetime(&build_context(settings).await?, args).await
        }
        config::Command::List(scope) => run_list(&build_context(settings).await?, scope).await,
        config::Command::Harmonize(args) => run_harmonize(&settings, args),
    }
}

async fn build_context(settings: config::Settings) -> Result<TemporalContext, AppError> {
    let repositories = init_repositories(&settings).await?;

    let sink: Arc<dyn CacheTagSink> = match &settings.purge.url {
        Some(url) => Arc::new(
            HttpPurgeSink::new(url.clone())
                .map_err(|err| InfraError::configuration(err.to_string()))?,
        ),
        None => Arc::new(TracingTagSink),
    };

    let context = TemporalContext::build(
        settings,
        TemporalAdapters {
            store: repositories.clone(),
            references: repositories.clone(),
            sink,
            watermarks: repositories,
            clock: Arc::new(SystemClock),
        },
    );

    info!(
        target = "bootstrap",
        scoping = context.scoping.name(),
        timing = context.timing.name(),
        tables = ?context.settings.content.tables,
        "transition engine ready"
    );

    Ok(context)
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

async fn run_scheduler(context: TemporalContext) -> Result<(), AppError> {
    let interval = context.settings.scheduler.interval;
    let schedule = transition_scan_schedule(interval)?;

    info!(
        target = "scheduler",
        interval_seconds = interval.as_secs(),
        "starting transition scan worker"
    );

    let worker = WorkerBuilder::new("transition-scan-worker")
        .concurrency(1)
        .data(context)
        .backend(CronStream::new(schedule))
        .build_fn(process_transition_scan_job);

    Monitor::new()
        .register(worker)
        .run_with_signal(tokio::signal::ctrl_c())
        .await
        .map_err(InfraError::from)?;

    info!(target = "scheduler", "transition scan worker stopped");
    Ok(())
}

async fn run_scan(context: &TemporalContext) -> Result<(), AppError> {
    let task = TransitionBatchTaskBuilder::from_context(context).build()?;
    let report: BatchReport = task.run().await?;
    print_json(&report)?;

    if report.success {
        Ok(())
    } else {
        Err(AppError::BatchFailed {
            processed: report.processed_count,
            errors: report.error_count,
        })
    }
}

#[derive(Serialize)]
struct NextTransitionOutput {
    workspace_id: i32,
    language_id: i32,
    now: UnixTimestamp,
    next_transition: Option<UnixTimestamp>,
    strategy: &'static str,
}

async fn run_next_transition(context: &TemporalContext, scope: ScopeArgs) -> Result<(), AppError> {
    let next_transition = context
        .scoping
        .next_transition(scope.workspace, scope.language)
        .await
        .map_err(TemporalError::from)?;

    print_json(&NextTransitionOutput {
        workspace_id: scope.workspace,
        language_id: scope.language,
        now: context.clock.now(),
        next_transition,
        strategy: context.scoping.name(),
    })
}

async fn run_lifetime(context: &TemporalContext, args: LifetimeArgs) -> Result<(), AppError> {
    let request = LifetimeRequest {
        proposed: args.proposed,
        site_ceiling: args
            .site_ceiling
            .unwrap_or(context.settings.lifetime.site_ceiling),
        workspace_id: args.scope.workspace,
        language_id: args.scope.language,
    };
    let decision = context.lifetime.decide(request).await;
    print_json(&decision)
}

async fn run_list(context: &TemporalContext, scope: ScopeArgs) -> Result<(), AppError> {
    let records = context
        .repository
        .find_all_with_temporal_fields(scope.workspace, scope.language)
        .await
        .map_err(TemporalError::from)?;
    print_json(&records)
}

#[derive(Serialize)]
struct HarmonizeOutput {
    timestamp: UnixTimestamp,
    harmonized: UnixTimestamp,
    enabled: bool,
}

fn run_harmonize(settings: &config::Settings, args: HarmonizeArgs) -> Result<(), AppError> {
    let harmonized = Harmonizer::from_settings(&settings.harmonization)
        .map(|harmonizer| harmonizer.harmonize(args.timestamp))
        .unwrap_or(args.timestamp);

    print_json(&HarmonizeOutput {
        timestamp: args.timestamp,
        harmonized,
        enabled: settings.harmonization.enabled,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
