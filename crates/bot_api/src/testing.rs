//! Fakes shared by the handler tests.

use std::{
    io::Cursor,
    path::Path,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, Rgb32FImage, RgbImage};
use render_integration::{DeepDreamEngine, RenderAdapter};
use shared::{
    domain::{ChatAction, ChatId, MessageId, UserId},
    protocol::{Inbound, TransformEvent},
};
use storage::Storage;

use crate::{
    catalog::{Keyboard, TransformCatalog},
    images::ImageStore,
    sessions::SessionStore,
    transport::ChatTransport,
    BotContext,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sent {
    Text {
        id: MessageId,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Edit {
        id: MessageId,
        text: String,
    },
    Delete {
        id: MessageId,
    },
    Photo {
        bytes: Vec<u8>,
    },
    Action(ChatAction),
}

pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    next_id: AtomicI64,
    photo: Vec<u8>,
}

impl RecordingTransport {
    pub(crate) fn new(photo: Vec<u8>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1000),
            photo,
        }
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub(crate) fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn photos(&self) -> Vec<Vec<u8>> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Photo { bytes } => Some(bytes),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn last_text(&self) -> Option<String> {
        self.texts().pop()
    }

    fn push(&self, sent: Sent) {
        self.sent.lock().expect("sent lock").push(sent);
    }

    fn next_id(&self) -> MessageId {
        MessageId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(
        &self,
        _chat_id: ChatId,
        _reply_to: Option<MessageId>,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageId> {
        let id = self.next_id();
        self.push(Sent::Text {
            id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(id)
    }

    async fn edit_text(&self, _chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()> {
        self.push(Sent::Edit {
            id: message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, _chat_id: ChatId, message_id: MessageId) -> Result<()> {
        self.push(Sent::Delete { id: message_id });
        Ok(())
    }

    async fn send_photo(
        &self,
        _chat_id: ChatId,
        _reply_to: Option<MessageId>,
        photo: Vec<u8>,
    ) -> Result<MessageId> {
        self.push(Sent::Photo { bytes: photo });
        Ok(self.next_id())
    }

    async fn send_action(&self, _chat_id: ChatId, action: ChatAction) -> Result<()> {
        self.push(Sent::Action(action));
        Ok(())
    }

    async fn download_photo(&self, file_id: &str) -> Result<Vec<u8>> {
        if file_id == "missing" {
            return Err(anyhow!("file {file_id} not found"));
        }
        Ok(self.photo.clone())
    }
}

/// A lossless image whose first pixel has the given red value.
pub(crate) fn png(red: u8) -> Vec<u8> {
    let image = RgbImage::from_pixel(4, 4, Rgb([red, 0, 0]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("encode png");
    buffer.into_inner()
}

pub(crate) fn red_of(bytes: &[u8]) -> u8 {
    image::load_from_memory(bytes).expect("decode").to_rgb8()[(0, 0)][0]
}

pub(crate) type RenderLog = Arc<Mutex<Vec<(String, u32)>>>;

/// Adds 40 to the red channel of its input, so repeated renders stack.
pub(crate) fn brightening_engine(log: RenderLog) -> impl DeepDreamEngine {
    move |image: &Rgb32FImage, destination: &Path, layer: &str, unit: u32| -> Result<()> {
        log.lock()
            .expect("log lock")
            .push((layer.to_string(), unit));
        let red = (image[(0, 0)][0] * 255.0).round() as u8;
        std::fs::write(destination, png(red.saturating_add(40)))?;
        Ok(())
    }
}

pub(crate) async fn context(
    engine: impl DeepDreamEngine + 'static,
) -> (tempfile::TempDir, BotContext) {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let ctx = BotContext {
        catalog: Arc::new(TransformCatalog::builtin().expect("catalog")),
        images: ImageStore::open(dir.path().join("images"))
            .await
            .expect("images"),
        sessions: SessionStore::load(storage).await.expect("sessions"),
        renderer: RenderAdapter::new(Arc::new(engine)),
    };
    (dir, ctx)
}

pub(crate) fn inbound(user: i64, event: TransformEvent) -> Inbound {
    Inbound {
        user_id: UserId(user),
        chat_id: ChatId(user),
        message_id: MessageId(1),
        event,
    }
}

pub(crate) fn command(user: i64, label: &str) -> Inbound {
    inbound(
        user,
        TransformEvent::Command {
            label: label.to_string(),
        },
    )
}

pub(crate) fn photo(user: i64) -> Inbound {
    inbound(
        user,
        TransformEvent::PhotoUpload {
            file_id: "photo-1".to_string(),
        },
    )
}
