use std::sync::Arc;

use anyhow::Context;
use bot_api::{BotContext, ChatTransport, Handler};
use shared::protocol::Inbound;
use tokio::sync::Semaphore;
use tracing::{error, warn};

/// Bounded pool of concurrent handler runs.
///
/// Events from different users run in parallel up to `size`; the polling
/// loop waits for a free slot once all are taken.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    ctx: BotContext,
    transport: Arc<dyn ChatTransport>,
    handler: Arc<dyn Handler>,
    error_text: Arc<str>,
}

impl WorkerPool {
    pub fn new(
        size: usize,
        ctx: BotContext,
        transport: Arc<dyn ChatTransport>,
        handler: Arc<dyn Handler>,
        error_text: &str,
    ) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            ctx,
            transport,
            handler,
            error_text: Arc::from(error_text),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Waits for a free worker and hands the event to it.
    pub async fn submit(&self, inbound: Inbound) -> anyhow::Result<()> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .context("worker pool closed")?;
        let pool = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            pool.run(inbound).await;
        });
        Ok(())
    }

    async fn run(&self, inbound: Inbound) {
        let task = {
            let ctx = self.ctx.clone();
            let transport = Arc::clone(&self.transport);
            let handler = Arc::clone(&self.handler);
            let inbound = inbound.clone();
            tokio::spawn(async move { handler.handle(&ctx, transport.as_ref(), &inbound).await })
        };

        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(user_id = %inbound.user_id, error = %err, "handler returned an error");
                self.reply_error(&inbound).await;
            }
            Err(join_error) => {
                error!(
                    user_id = %inbound.user_id,
                    kind = inbound.event.kind(),
                    error = %join_error,
                    "handler panicked"
                );
                self.reply_error(&inbound).await;
            }
        }
    }

    async fn reply_error(&self, inbound: &Inbound) {
        if let Err(err) = self
            .transport
            .send_text(
                inbound.chat_id,
                Some(inbound.message_id),
                &self.error_text,
                None,
            )
            .await
        {
            warn!(user_id = %inbound.user_id, error = %err, "failed to send error reply");
        }
    }
}

#[cfg(test)]
#[path = "tests/worker_tests.rs"]
mod tests;
