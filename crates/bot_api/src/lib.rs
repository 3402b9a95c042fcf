//! Session handling and command dispatch for the deep dream bot.

use std::sync::Arc;

use render_integration::RenderAdapter;

pub mod catalog;
pub mod dispatcher;
pub mod images;
pub mod middleware;
pub mod sessions;
pub mod transport;

#[cfg(test)]
mod testing;

pub use catalog::{CatalogEntry, CatalogError, Keyboard, TransformCatalog};
pub use dispatcher::{transition, DreamHandler, Step};
pub use images::{ImageStore, ImageVariant};
pub use middleware::{Handler, Logged, Recover};
pub use sessions::{BusyGuard, SessionStore, UserSession};
pub use transport::ChatTransport;

/// Everything a handler needs, shared by all workers.
#[derive(Clone)]
pub struct BotContext {
    pub catalog: Arc<TransformCatalog>,
    pub images: ImageStore,
    pub sessions: SessionStore,
    pub renderer: RenderAdapter,
}

/// The handler chain the bot runs for every event.
pub fn handler_stack(error_text: impl Into<String>) -> Recover<Logged<DreamHandler>> {
    Recover::new(Logged::new(DreamHandler), error_text)
}
