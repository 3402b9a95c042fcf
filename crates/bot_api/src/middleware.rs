use std::time::Instant;

use async_trait::async_trait;
use shared::{error::BotError, protocol::Inbound};
use tracing::{debug, error, info_span, warn, Instrument};

use crate::{transport::ChatTransport, BotContext};

/// One step of inbound event handling.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        ctx: &BotContext,
        transport: &dyn ChatTransport,
        inbound: &Inbound,
    ) -> Result<(), BotError>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for std::sync::Arc<H> {
    async fn handle(
        &self,
        ctx: &BotContext,
        transport: &dyn ChatTransport,
        inbound: &Inbound,
    ) -> Result<(), BotError> {
        (**self).handle(ctx, transport, inbound).await
    }
}

/// Runs the inner handler inside a per-event span and logs entry and exit.
pub struct Logged<H> {
    inner: H,
}

impl<H> Logged<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<H: Handler> Handler for Logged<H> {
    async fn handle(
        &self,
        ctx: &BotContext,
        transport: &dyn ChatTransport,
        inbound: &Inbound,
    ) -> Result<(), BotError> {
        let span = info_span!(
            "event",
            user_id = %inbound.user_id,
            chat_id = %inbound.chat_id,
            kind = inbound.event.kind(),
        );
        async {
            debug!(event = ?inbound.event, "start");
            let started = Instant::now();
            let result = self.inner.handle(ctx, transport, inbound).await;
            debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                ok = result.is_ok(),
                "finish"
            );
            result
        }
        .instrument(span)
        .await
    }
}

/// Turns every error into a reply to the user. Errors with a reply text of
/// their own are expected outcomes; anything else gets the generic text.
pub struct Recover<H> {
    inner: H,
    error_text: String,
}

impl<H> Recover<H> {
    pub fn new(inner: H, error_text: impl Into<String>) -> Self {
        Self {
            inner,
            error_text: error_text.into(),
        }
    }
}

#[async_trait]
impl<H: Handler> Handler for Recover<H> {
    async fn handle(
        &self,
        ctx: &BotContext,
        transport: &dyn ChatTransport,
        inbound: &Inbound,
    ) -> Result<(), BotError> {
        let Err(err) = self.inner.handle(ctx, transport, inbound).await else {
            return Ok(());
        };

        let text = match err.user_message() {
            Some(text) => {
                warn!(user_id = %inbound.user_id, code = ?err.code(), error = %err, "event rejected");
                text
            }
            None => {
                error!(
                    user_id = %inbound.user_id,
                    chat_id = %inbound.chat_id,
                    event = ?inbound.event,
                    error = %err,
                    "event failed"
                );
                self.error_text.as_str()
            }
        };

        if let Err(reply_error) = transport
            .send_text(inbound.chat_id, Some(inbound.message_id), text, None)
            .await
        {
            error!(user_id = %inbound.user_id, error = %reply_error, "failed to send error reply");
        }
        Ok(())
    }
}
