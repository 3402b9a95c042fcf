use async_trait::async_trait;
use render_integration::{decode_image, RenderRequest};
use shared::{
    domain::{ChatAction, MessageId},
    error::{BotError, BUSY_TEXT, UNKNOWN_COMMAND_TEXT},
    protocol::{Inbound, TransformEvent},
};
use tracing::{debug, warn};

use crate::{
    catalog::{TransformCatalog, COMMAND_GET_ORIGINAL_PHOTO, COMMAND_RETRY},
    images::ImageVariant,
    middleware::Handler,
    sessions::UserSession,
    transport::ChatTransport,
    BotContext,
};

pub const START_TEXT: &str = "Send me a picture";
pub const DOWNLOADING_TEXT: &str = "Downloading a picture ...";
pub const DOWNLOADED_TEXT: &str = "Picture downloaded!";
pub const AVAILABLE_TEXT: &str = "Deep dream is now available";
pub const RESET_DONE_TEXT: &str = "Reset was successful";
pub const WAITING_TEXT: &str = "Waiting ...";

const PROGRESS_EMPTY: &str = "⬜⬜⬜⬜⬜";
const PROGRESS_HALF: &str = "⬛⬛⬛⬜⬜";
const PROGRESS_FULL: &str = "⬛⬛⬛⬛⬛";

/// What the dispatcher decided to do with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Greet,
    StorePhoto { file_id: String },
    ServeOriginal,
    Render { label: String, layer: String, unit: u32 },
    ResetWorking,
    RejectBusy,
    RejectUnknown,
}

/// The per-user state machine: decides the next step from the session as it
/// is now. Performs no I/O.
pub fn transition(
    session: &UserSession,
    event: &TransformEvent,
    catalog: &TransformCatalog,
) -> Result<Step, BotError> {
    match event {
        TransformEvent::Start => Ok(Step::Greet),
        TransformEvent::Unknown { .. } => Ok(Step::RejectUnknown),
        _ if session.busy => Ok(Step::RejectBusy),
        TransformEvent::PhotoUpload { file_id } => Ok(Step::StorePhoto {
            file_id: file_id.clone(),
        }),
        TransformEvent::Reset => Ok(Step::ResetWorking),
        TransformEvent::Command { label } => resolve_command(session, label, catalog),
    }
}

fn resolve_command(
    session: &UserSession,
    label: &str,
    catalog: &TransformCatalog,
) -> Result<Step, BotError> {
    if label == COMMAND_GET_ORIGINAL_PHOTO {
        return Ok(Step::ServeOriginal);
    }

    let label = if label == COMMAND_RETRY {
        session
            .last_command
            .as_deref()
            .ok_or(BotError::NoPriorCommand)?
    } else {
        label
    };

    let entry = catalog.lookup(label)?;
    Ok(Step::Render {
        label: entry.label.clone(),
        layer: entry.layer.clone(),
        unit: entry.unit,
    })
}

/// Text shown while a render runs, based on how long the previous one took.
pub fn wait_hint(last_elapsed: Option<f64>) -> String {
    match last_elapsed {
        Some(secs) if secs > 0.0 => format!("Wait ~{} seconds", secs.ceil() as u64),
        _ => WAITING_TEXT.to_string(),
    }
}

/// Executes the steps chosen by [`transition`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DreamHandler;

#[async_trait]
impl Handler for DreamHandler {
    async fn handle(
        &self,
        ctx: &BotContext,
        transport: &dyn ChatTransport,
        inbound: &Inbound,
    ) -> Result<(), BotError> {
        let session = ctx.sessions.snapshot(inbound.user_id);
        let step = transition(&session, &inbound.event, &ctx.catalog)?;
        debug!(?step, "dispatching");

        match step {
            Step::Greet => reply(transport, inbound, START_TEXT).await,
            Step::RejectBusy => reply(transport, inbound, BUSY_TEXT).await,
            Step::RejectUnknown => reply(transport, inbound, UNKNOWN_COMMAND_TEXT).await,
            Step::StorePhoto { file_id } => store_photo(ctx, transport, inbound, &file_id).await,
            Step::ServeOriginal => serve_original(ctx, transport, inbound).await,
            Step::ResetWorking => reset_working(ctx, transport, inbound).await,
            Step::Render { label, layer, unit } => {
                render(
                    ctx,
                    transport,
                    inbound,
                    &label,
                    &layer,
                    unit,
                    session.last_elapsed,
                )
                .await
            }
        }
    }
}

async fn reply(
    transport: &dyn ChatTransport,
    inbound: &Inbound,
    text: &str,
) -> Result<(), BotError> {
    transport
        .send_text(inbound.chat_id, Some(inbound.message_id), text, None)
        .await
        .map_err(transport_error)?;
    Ok(())
}

async fn store_photo(
    ctx: &BotContext,
    transport: &dyn ChatTransport,
    inbound: &Inbound,
    file_id: &str,
) -> Result<(), BotError> {
    let user_id = inbound.user_id;
    // The upload rewrites the working image, so it takes the busy flag too.
    let Some(guard) = ctx.sessions.try_acquire(user_id).await? else {
        return reply(transport, inbound, BUSY_TEXT).await;
    };

    let stored = async {
        let chat_id = inbound.chat_id;
        debug!(file_id, "downloading photo");
        let progress = transport
            .send_text(
                chat_id,
                Some(inbound.message_id),
                &format!("{DOWNLOADING_TEXT}\n{PROGRESS_EMPTY}"),
                None,
            )
            .await
            .map_err(transport_error)?;
        transport
            .send_action(chat_id, ChatAction::Typing)
            .await
            .map_err(transport_error)?;

        let bytes = transport
            .download_photo(file_id)
            .await
            .map_err(transport_error)?;
        transport
            .edit_text(chat_id, progress, &format!("{DOWNLOADING_TEXT}\n{PROGRESS_HALF}"))
            .await
            .map_err(transport_error)?;

        ctx.images.save_original(user_id, &bytes).await?;
        debug!(size = bytes.len(), "photo stored");
        transport
            .edit_text(chat_id, progress, &format!("{DOWNLOADED_TEXT}\n{PROGRESS_FULL}"))
            .await
            .map_err(transport_error)?;
        delete_quietly(transport, inbound, progress).await;

        ctx.sessions.clear_elapsed(user_id).await
    }
    .await;

    let released = guard.release().await;
    stored?;
    released?;

    let keyboard = ctx.catalog.keyboard();
    transport
        .send_text(
            inbound.chat_id,
            Some(inbound.message_id),
            AVAILABLE_TEXT,
            Some(&keyboard),
        )
        .await
        .map_err(transport_error)?;
    Ok(())
}

async fn serve_original(
    ctx: &BotContext,
    transport: &dyn ChatTransport,
    inbound: &Inbound,
) -> Result<(), BotError> {
    let photo = ctx.images.open_original(inbound.user_id).await?;
    send_photo(transport, inbound, photo).await
}

async fn reset_working(
    ctx: &BotContext,
    transport: &dyn ChatTransport,
    inbound: &Inbound,
) -> Result<(), BotError> {
    let user_id = inbound.user_id;
    if !ctx.images.has_original(user_id).await {
        return Err(BotError::MissingOriginal);
    }
    let Some(guard) = ctx.sessions.try_acquire(user_id).await? else {
        return reply(transport, inbound, BUSY_TEXT).await;
    };

    let reset = ctx.images.reset_working(user_id).await;
    let released = guard.release().await;
    reset?;
    released?;

    reply(transport, inbound, RESET_DONE_TEXT).await
}

async fn render(
    ctx: &BotContext,
    transport: &dyn ChatTransport,
    inbound: &Inbound,
    label: &str,
    layer: &str,
    unit: u32,
    last_elapsed: Option<f64>,
) -> Result<(), BotError> {
    let user_id = inbound.user_id;
    if !ctx.images.has_original(user_id).await {
        return Err(BotError::MissingOriginal);
    }
    let Some(guard) = ctx.sessions.try_acquire(user_id).await? else {
        return reply(transport, inbound, BUSY_TEXT).await;
    };

    let wait_message = transport
        .send_text(
            inbound.chat_id,
            Some(inbound.message_id),
            &wait_hint(last_elapsed),
            None,
        )
        .await
        .map_err(transport_error)?;

    let destination = ctx.images.path_for(user_id, ImageVariant::Working);
    let rendered = async {
        let bytes = ctx.images.read_working(user_id).await?;
        let image = decode_image(&bytes).map_err(|e| BotError::RenderFailed(e.reason))?;
        ctx.renderer
            .render(RenderRequest {
                image,
                destination: destination.clone(),
                layer: layer.to_string(),
                unit,
            })
            .await
            .map_err(|e| BotError::RenderFailed(e.reason))
    }
    .await;

    let released = guard.release().await;
    delete_quietly(transport, inbound, wait_message).await;
    let elapsed = rendered?;
    released?;

    ctx.sessions
        .record_render_outcome(user_id, elapsed, label)
        .await?;
    debug!(
        command = label,
        elapsed_secs = elapsed.as_secs_f64(),
        path = %destination.display(),
        "render complete"
    );

    let photo = ctx.images.read_working(user_id).await?;
    send_photo(transport, inbound, photo).await
}

async fn send_photo(
    transport: &dyn ChatTransport,
    inbound: &Inbound,
    photo: Vec<u8>,
) -> Result<(), BotError> {
    transport
        .send_action(inbound.chat_id, ChatAction::UploadPhoto)
        .await
        .map_err(transport_error)?;
    transport
        .send_photo(inbound.chat_id, Some(inbound.message_id), photo)
        .await
        .map_err(transport_error)?;
    Ok(())
}

async fn delete_quietly(transport: &dyn ChatTransport, inbound: &Inbound, message_id: MessageId) {
    if let Err(error) = transport.delete_message(inbound.chat_id, message_id).await {
        warn!(%message_id, error = %error, "failed to delete status message");
    }
}

fn transport_error(err: anyhow::Error) -> BotError {
    BotError::Transport(format!("{err:#}"))
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
