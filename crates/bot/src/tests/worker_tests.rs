use super::*;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bot_api::{ImageStore, Keyboard, SessionStore, TransformCatalog};
use render_integration::{MissingEngine, RenderAdapter};
use shared::{
    domain::{ChatAction, ChatId, MessageId, UserId},
    error::BotError,
    protocol::TransformEvent,
};
use storage::Storage;
use tempfile::TempDir;
use tokio::sync::Notify;

#[derive(Default)]
struct TextLog {
    texts: Mutex<Vec<(ChatId, String)>>,
}

impl TextLog {
    fn texts(&self) -> Vec<(ChatId, String)> {
        self.texts.lock().expect("texts").clone()
    }
}

#[async_trait]
impl ChatTransport for TextLog {
    async fn send_text(
        &self,
        chat_id: ChatId,
        _reply_to: Option<MessageId>,
        text: &str,
        _keyboard: Option<&Keyboard>,
    ) -> anyhow::Result<MessageId> {
        self.texts
            .lock()
            .expect("texts")
            .push((chat_id, text.to_string()));
        Ok(MessageId(1))
    }

    async fn edit_text(&self, _: ChatId, _: MessageId, _: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn delete_message(&self, _: ChatId, _: MessageId) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_photo(&self, _: ChatId, _: Option<MessageId>, _: Vec<u8>) -> anyhow::Result<MessageId> {
        Ok(MessageId(2))
    }

    async fn send_action(&self, _: ChatId, _: ChatAction) -> anyhow::Result<()> {
        Ok(())
    }

    async fn download_photo(&self, _: &str) -> anyhow::Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

struct Panicking;

#[async_trait]
impl Handler for Panicking {
    async fn handle(&self, _: &BotContext, _: &dyn ChatTransport, _: &Inbound) -> Result<(), BotError> {
        panic!("renderer state corrupted");
    }
}

struct Failing;

#[async_trait]
impl Handler for Failing {
    async fn handle(&self, _: &BotContext, _: &dyn ChatTransport, _: &Inbound) -> Result<(), BotError> {
        Err(BotError::Internal("disk full".into()))
    }
}

/// Blocks every event until released, counting how many run at once.
#[derive(Default)]
struct Gate {
    running: AtomicUsize,
    peak: AtomicUsize,
    finished: AtomicUsize,
    release: Notify,
}

#[async_trait]
impl Handler for Gate {
    async fn handle(&self, _: &BotContext, _: &dyn ChatTransport, _: &Inbound) -> Result<(), BotError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.release.notified().await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn context() -> (TempDir, BotContext) {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = Storage::new("sqlite::memory:").await.expect("storage");
    let ctx = BotContext {
        catalog: Arc::new(TransformCatalog::builtin().expect("catalog")),
        images: ImageStore::open(dir.path().join("images")).await.expect("images"),
        sessions: SessionStore::load(storage).await.expect("sessions"),
        renderer: RenderAdapter::new(Arc::new(MissingEngine)),
    };
    (dir, ctx)
}

fn inbound(user: i64) -> Inbound {
    Inbound {
        user_id: UserId(user),
        chat_id: ChatId(user * 10),
        message_id: MessageId(1),
        event: TransformEvent::Start,
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn panicking_handler_gets_error_reply() {
    let (_dir, ctx) = context().await;
    let transport = Arc::new(TextLog::default());
    let pool = WorkerPool::new(2, ctx, transport.clone(), Arc::new(Panicking), "Oops");

    pool.submit(inbound(3)).await.expect("submit");
    wait_until(|| !transport.texts().is_empty()).await;

    assert_eq!(transport.texts(), vec![(ChatId(30), "Oops".to_string())]);
    wait_until(|| pool.available() == 2).await;
}

#[tokio::test]
async fn escaped_errors_get_error_reply() {
    let (_dir, ctx) = context().await;
    let transport = Arc::new(TextLog::default());
    let pool = WorkerPool::new(1, ctx, transport.clone(), Arc::new(Failing), "Oops");

    pool.submit(inbound(4)).await.expect("submit");
    wait_until(|| !transport.texts().is_empty()).await;

    assert_eq!(transport.texts(), vec![(ChatId(40), "Oops".to_string())]);
}

#[tokio::test]
async fn pool_survives_a_panic() {
    let (_dir, ctx) = context().await;
    let transport = Arc::new(TextLog::default());
    let pool = WorkerPool::new(1, ctx, transport.clone(), Arc::new(Panicking), "Oops");

    pool.submit(inbound(1)).await.expect("first");
    pool.submit(inbound(2)).await.expect("second");
    wait_until(|| transport.texts().len() == 2).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_is_bounded_by_pool_size() {
    let (_dir, ctx) = context().await;
    let transport = Arc::new(TextLog::default());
    let gate = Arc::new(Gate::default());
    let pool = WorkerPool::new(2, ctx, transport, gate.clone(), "Oops");

    pool.submit(inbound(1)).await.expect("first");
    pool.submit(inbound(2)).await.expect("second");
    wait_until(|| gate.running.load(Ordering::SeqCst) == 2).await;
    assert_eq!(pool.available(), 0);

    // The third submission waits for a slot.
    let third = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.submit(inbound(3)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!third.is_finished());

    while gate.finished.load(Ordering::SeqCst) < 3 {
        gate.release.notify_waiters();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    third.await.expect("join").expect("third");

    assert_eq!(gate.peak.load(Ordering::SeqCst), 2);
}

#[test]
fn pool_size_is_at_least_one() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let (_dir, ctx) = context().await;
        let pool = WorkerPool::new(0, ctx, Arc::new(TextLog::default()), Arc::new(Failing), "Oops");
        assert_eq!(pool.size(), 1);
    });
}
