use std::{sync::Arc, time::Duration};

use anyhow::Context;
use bot_api::{handler_stack, BotContext, ImageStore, SessionStore, TransformCatalog};
use render_integration::{DeepDreamEngine, MissingEngine, ProcessEngine, RenderAdapter};
use storage::Storage;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod health;
mod telegram;
mod worker;

use config::{cpu_count, load_settings, prepare_database_url, Settings};
use health::HealthState;
use telegram::{to_inbound, TelegramTransport};
use worker::WorkerPool;

// Consecutive failed polls tolerated before the whole bot is restarted.
const MAX_POLL_FAILURES: u32 = 5;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(error) => {
            init_tracing("info");
            error!(error = %format!("{error:#}"), "failed to load configuration");
            return Err(error);
        }
    };
    init_tracing(&settings.log_filter);

    let restart_delay = Duration::from_secs(settings.restart_delay_secs);
    loop {
        tokio::select! {
            result = run(&settings) => match result {
                Ok(()) => return Ok(()),
                Err(error) => error!(error = %format!("{error:#}"), "bot stopped unexpectedly"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }

        info!(delay_secs = restart_delay.as_secs(), "restarting the bot");
        tokio::select! {
            _ = tokio::time::sleep(restart_delay) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // A second call after a restart is a no-op.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn run(settings: &Settings) -> anyhow::Result<()> {
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            error = %error,
            "failed to open session database; verify the directory exists and is writable"
        );
        error
    })?;

    let catalog = Arc::new(match &settings.catalog {
        Some(rows) => TransformCatalog::new(rows.clone()).context("invalid catalog in configuration")?,
        None => TransformCatalog::builtin().context("invalid built-in catalog")?,
    });
    let images = ImageStore::open(&settings.images_dir).await?;
    let sessions = SessionStore::load(storage.clone()).await?;
    let renderer = RenderAdapter::new(render_engine(&settings.render_command)?);
    let ctx = BotContext {
        catalog: Arc::clone(&catalog),
        images,
        sessions,
        renderer,
    };

    let transport = Arc::new(TelegramTransport::new(
        &settings.telegram_api_url,
        &settings.telegram_token,
        Duration::from_secs(settings.poll_timeout_secs),
    )?);
    let me = transport.get_me().await.context("telegram rejected the bot token")?;
    info!(
        bot_id = me.id,
        username = me.username.as_deref().unwrap_or_default(),
        "connected to telegram"
    );

    let _health = match &settings.health_bind {
        Some(bind) => Some(
            health::serve(
                bind,
                HealthState {
                    storage,
                    catalog: Arc::clone(&catalog),
                },
            )
            .await?,
        ),
        None => None,
    };

    let pool = WorkerPool::new(
        settings.worker_count(),
        ctx,
        transport.clone(),
        Arc::new(handler_stack(settings.error_text.as_str())),
        &settings.error_text,
    );
    info!(cpu_count = cpu_count(), workers = pool.size(), "worker pool ready");

    poll_updates(&transport, &pool, &catalog, settings.poll_timeout_secs).await
}

fn render_engine(command: &[String]) -> anyhow::Result<Arc<dyn DeepDreamEngine>> {
    if command.is_empty() {
        warn!("render_command is empty; every transform request will fail");
        return Ok(Arc::new(MissingEngine));
    }
    let engine = ProcessEngine::new(command)?;
    info!(program = engine.program(), "using external render command");
    Ok(Arc::new(engine))
}

async fn poll_updates(
    transport: &TelegramTransport,
    pool: &WorkerPool,
    catalog: &TransformCatalog,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    let mut offset = None;
    let mut failures = 0;
    loop {
        let updates = match transport.get_updates(offset, timeout_secs).await {
            Ok(updates) => {
                failures = 0;
                updates
            }
            Err(error) => {
                failures += 1;
                if failures >= MAX_POLL_FAILURES {
                    return Err(error.context("polling failed repeatedly"));
                }
                warn!(error = %format!("{error:#}"), failures, "polling failed; retrying");
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = Some(update.update_id + 1);
            let update_id = update.update_id;
            match to_inbound(update, catalog) {
                Some(inbound) => pool.submit(inbound).await?,
                None => debug!(update_id, "ignoring update without a user message"),
            }
        }
    }
}
