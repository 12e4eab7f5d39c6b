// Debounced message queue: batches rapid submissions into a single model
// turn. idle -> queuing (timer armed) -> flushing -> idle. The debounce
// timer is the only scheduling primitive and is cancellable; submitting
// while a stream is in flight skips the timer, interrupts the stream and
// flushes immediately.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::data::model::MessageFileAttachment;

pub const DEBOUNCE: Duration = Duration::from_millis(500);

// Synthetic ids previewing content the server has not acknowledged yet.
// They are re-keyed to the server-assigned message id once it appears.
pub const PLACEHOLDER_PENDING: &str = "pending";
pub const PLACEHOLDER_QUEUED: &str = "queued";
pub const PLACEHOLDER_LATEST_UPLOAD: &str = "__latest_user_upload";

/// Stand-in text when a flush carries attachments but no typed message.
pub const ATTACHMENT_ONLY_TEXT: &str = "(uploaded files)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Queuing,
    Flushing,
}

/// One combined user turn handed to the sink.
#[derive(Debug, Clone)]
pub struct QueuedTurn {
    /// None on the first turn; the sink creates the session then.
    pub chat_id: Option<String>,
    pub text: String,
    pub attachments: Vec<MessageFileAttachment>,
}

/// What the sink reports back after persisting a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReceipt {
    pub chat_id: String,
    pub message_id: String,
    pub title: Option<String>,
}

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Seam between the queue and the chat session it feeds.
#[async_trait]
pub trait TurnSink: Send + Sync + 'static {
    /// True while a model stream for this session is in flight.
    async fn is_streaming(&self) -> bool;
    /// Stop the in-flight stream, if any.
    async fn interrupt(&self);
    /// Create the session (first turn) or append to it.
    async fn deliver(&self, turn: QueuedTurn) -> Result<TurnReceipt, SinkError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewMessage {
    pub id: String,
    pub text: String,
}

struct Inner {
    state: QueueState,
    texts: Vec<String>,
    attachments: Vec<MessageFileAttachment>,
    chat_id: Option<String>,
    /// Text currently being delivered; previewed under the `pending` id.
    inflight: Option<String>,
    /// Reconciled (server message id, text) entries, placeholders discarded.
    delivered: Vec<(String, String)>,
    /// Bumped to invalidate an armed timer.
    timer_gen: u64,
}

pub struct MessageQueue<S: TurnSink> {
    sink: Arc<S>,
    debounce: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl<S: TurnSink> Clone for MessageQueue<S> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            debounce: self.debounce,
            inner: self.inner.clone(),
        }
    }
}

impl<S: TurnSink> MessageQueue<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self::with_debounce(sink, DEBOUNCE)
    }

    pub fn with_debounce(sink: Arc<S>, debounce: Duration) -> Self {
        Self {
            sink,
            debounce,
            inner: Arc::new(Mutex::new(Inner {
                state: QueueState::Idle,
                texts: Vec::new(),
                attachments: Vec::new(),
                chat_id: None,
                inflight: None,
                delivered: Vec::new(),
                timer_gen: 0,
            })),
        }
    }

    /// Resume an existing session instead of creating one on first flush.
    pub async fn attach_to_chat(&self, chat_id: impl Into<String>) {
        self.inner.lock().await.chat_id = Some(chat_id.into());
    }

    pub async fn state(&self) -> QueueState {
        self.inner.lock().await.state
    }

    /// Queue a message. Re-arms the debounce timer, except when a stream is
    /// in flight: then the stream is interrupted and the queue flushes at
    /// once.
    pub async fn submit(&self, text: impl Into<String>) -> Result<Option<TurnReceipt>, SinkError> {
        let text = text.into();
        if !text.trim().is_empty() {
            self.inner.lock().await.texts.push(text);
        }
        self.after_submit().await
    }

    /// Queue file attachments with no accompanying text.
    pub async fn submit_attachments(
        &self,
        files: Vec<MessageFileAttachment>,
    ) -> Result<Option<TurnReceipt>, SinkError> {
        if !files.is_empty() {
            self.inner.lock().await.attachments.extend(files);
        }
        self.after_submit().await
    }

    async fn after_submit(&self) -> Result<Option<TurnReceipt>, SinkError> {
        if self.sink.is_streaming().await {
            self.sink.interrupt().await;
            return self.flush_now().await;
        }
        self.arm_timer().await;
        Ok(None)
    }

    async fn arm_timer(&self) {
        let generation = {
            let mut inner = self.inner.lock().await;
            if inner.state == QueueState::Flushing {
                // flush completion re-arms for us
                return;
            }
            inner.state = QueueState::Queuing;
            inner.timer_gen += 1;
            inner.timer_gen
        };

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(queue.debounce).await;
            let expired = {
                let inner = queue.inner.lock().await;
                inner.timer_gen == generation && inner.state == QueueState::Queuing
            };
            if expired {
                if let Err(e) = queue.flush_now().await {
                    tracing::warn!("queue flush failed: {}", e);
                }
            }
        });
    }

    /// Drain the queue into one combined turn and deliver it. Duplicate
    /// texts collapse to their first occurrence; the unique texts are
    /// joined with blank lines.
    ///
    /// Boxed: a flush re-arms the timer and the timer task flushes in turn,
    /// so one side of the cycle must be type-erased for `tokio::spawn`.
    pub fn flush_now(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<TurnReceipt>, SinkError>> + Send + '_>> {
        Box::pin(async move {
            let turn = {
                let mut inner = self.inner.lock().await;
                if inner.state == QueueState::Flushing {
                    return Ok(None);
                }
                inner.timer_gen += 1; // cancel any armed timer

                let texts = dedupe_preserving_order(std::mem::take(&mut inner.texts));
                let attachments = std::mem::take(&mut inner.attachments);
                if texts.is_empty() && attachments.is_empty() {
                    inner.state = QueueState::Idle;
                    return Ok(None);
                }
                let text = if texts.is_empty() {
                    ATTACHMENT_ONLY_TEXT.to_string()
                } else {
                    texts.join("\n\n")
                };
                inner.state = QueueState::Flushing;
                inner.inflight = Some(text.clone());
                QueuedTurn {
                    chat_id: inner.chat_id.clone(),
                    text,
                    attachments,
                }
            };

            let result = self.sink.deliver(turn.clone()).await;

            let mut inner = self.inner.lock().await;
            inner.inflight = None;
            match result {
                Ok(receipt) => {
                    inner.chat_id = Some(receipt.chat_id.clone());
                    inner
                        .delivered
                        .push((receipt.message_id.clone(), turn.text));
                    inner.state = QueueState::Idle;
                    let rearm = !inner.texts.is_empty() || !inner.attachments.is_empty();
                    drop(inner);
                    if rearm {
                        self.arm_timer().await;
                    }
                    Ok(Some(receipt))
                }
                Err(e) => {
                    // put the combined turn back so nothing is lost
                    inner.texts.insert(0, turn.text);
                    inner.attachments.splice(0..0, turn.attachments);
                    inner.state = QueueState::Idle;
                    Err(e)
                }
            }
        })
    }

    /// Cancel the debounce timer and discard queued content. The in-flight
    /// delivery, if any, is not interrupted.
    pub async fn cancel_pending(&self) {
        let mut inner = self.inner.lock().await;
        inner.timer_gen += 1;
        inner.texts.clear();
        inner.attachments.clear();
        if inner.state == QueueState::Queuing {
            inner.state = QueueState::Idle;
        }
    }

    /// The messages a client would render for this session: reconciled
    /// entries under their server-assigned ids, then synthetic placeholders
    /// for in-flight and still-queued content.
    pub async fn preview(&self) -> Vec<PreviewMessage> {
        let inner = self.inner.lock().await;
        let mut out: Vec<PreviewMessage> = inner
            .delivered
            .iter()
            .map(|(id, text)| PreviewMessage {
                id: id.clone(),
                text: text.clone(),
            })
            .collect();
        if let Some(text) = &inner.inflight {
            out.push(PreviewMessage {
                id: PLACEHOLDER_PENDING.to_string(),
                text: text.clone(),
            });
        }
        let queued = dedupe_preserving_order(inner.texts.clone());
        if !queued.is_empty() {
            out.push(PreviewMessage {
                id: PLACEHOLDER_QUEUED.to_string(),
                text: queued.join("\n\n"),
            });
        } else if !inner.attachments.is_empty() {
            out.push(PreviewMessage {
                id: PLACEHOLDER_LATEST_UPLOAD.to_string(),
                text: ATTACHMENT_ONLY_TEXT.to_string(),
            });
        }
        out
    }
}

fn dedupe_preserving_order(texts: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    texts
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockSink {
        streaming: AtomicBool,
        interrupts: AtomicUsize,
        fail_next: AtomicBool,
        counter: AtomicUsize,
        delivery_delay_ms: AtomicUsize,
        delivered: Mutex<Vec<QueuedTurn>>,
    }

    impl MockSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                streaming: AtomicBool::new(false),
                interrupts: AtomicUsize::new(0),
                fail_next: AtomicBool::new(false),
                counter: AtomicUsize::new(0),
                delivery_delay_ms: AtomicUsize::new(0),
                delivered: Mutex::new(Vec::new()),
            })
        }

        async fn delivered_turns(&self) -> Vec<QueuedTurn> {
            self.delivered.lock().await.clone()
        }
    }

    #[async_trait]
    impl TurnSink for MockSink {
        async fn is_streaming(&self) -> bool {
            self.streaming.load(Ordering::SeqCst)
        }

        async fn interrupt(&self) {
            self.interrupts.fetch_add(1, Ordering::SeqCst);
            self.streaming.store(false, Ordering::SeqCst);
        }

        async fn deliver(&self, turn: QueuedTurn) -> Result<TurnReceipt, SinkError> {
            let delay = self.delivery_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err("gateway unavailable".into());
            }
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            self.delivered.lock().await.push(turn.clone());
            Ok(TurnReceipt {
                chat_id: turn.chat_id.unwrap_or_else(|| "chat-1".to_string()),
                message_id: format!("msg-{}", n),
                title: Some("t".to_string()),
            })
        }
    }

    fn attachment(name: &str) -> MessageFileAttachment {
        MessageFileAttachment {
            id: format!("file-{}", name),
            name: name.to_string(),
            size: 1,
            mime_type: "text/plain".to_string(),
            preview_url: None,
            storage_path: format!("uploads/{}", name),
            read_url: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dedupes_and_joins_within_window() {
        let sink = MockSink::new();
        let queue = MessageQueue::new(sink.clone());

        queue.submit("a").await.unwrap();
        queue.submit("b").await.unwrap();
        queue.submit("a").await.unwrap();
        assert_eq!(queue.state().await, QueueState::Queuing);

        tokio::time::sleep(Duration::from_millis(600)).await;

        let turns = sink.delivered_turns().await;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text, "a\n\nb");
        assert_eq!(queue.state().await, QueueState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn each_submit_rearms_the_timer() {
        let sink = MockSink::new();
        let queue = MessageQueue::new(sink.clone());

        queue.submit("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        queue.submit("b").await.unwrap();
        // first timer would have fired at 500ms; the re-arm moved it
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(sink.delivered_turns().await.is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let turns = sink.delivered_turns().await;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text, "a\n\nb");
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_submit_interrupts_and_flushes_immediately() {
        let sink = MockSink::new();
        sink.streaming.store(true, Ordering::SeqCst);
        let queue = MessageQueue::new(sink.clone());

        let receipt = queue.submit("stop, do this instead").await.unwrap();
        assert!(receipt.is_some());
        assert_eq!(sink.interrupts.load(Ordering::SeqCst), 1);
        // no time advanced, the flush did not wait for the debounce window
        assert_eq!(sink.delivered_turns().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn placeholders_rekey_to_server_ids() {
        let sink = MockSink::new();
        let queue = MessageQueue::new(sink.clone());

        queue.submit("hello").await.unwrap();
        let preview = queue.preview().await;
        assert_eq!(preview.len(), 1);
        assert_eq!(preview[0].id, PLACEHOLDER_QUEUED);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let preview = queue.preview().await;
        assert_eq!(preview.len(), 1);
        assert_eq!(preview[0].id, "msg-0");
        assert_eq!(preview[0].text, "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn attachment_only_flush_uses_placeholder_text() {
        let sink = MockSink::new();
        let queue = MessageQueue::new(sink.clone());

        queue.submit_attachments(vec![attachment("report.pdf")]).await.unwrap();
        let preview = queue.preview().await;
        assert_eq!(preview[0].id, PLACEHOLDER_LATEST_UPLOAD);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let turns = sink.delivered_turns().await;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text, ATTACHMENT_ONLY_TEXT);
        assert_eq!(turns[0].attachments.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn later_turns_reuse_the_session() {
        let sink = MockSink::new();
        let queue = MessageQueue::new(sink.clone());

        queue.submit("first").await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        queue.submit("second").await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        let turns = sink.delivered_turns().await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].chat_id, None);
        assert_eq!(turns[1].chat_id.as_deref(), Some("chat-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn submissions_during_a_flush_get_their_own_turn() {
        let sink = MockSink::new();
        sink.delivery_delay_ms.store(100, Ordering::SeqCst);
        let queue = MessageQueue::new(sink.clone());

        queue.submit("first").await.unwrap();
        // the timer fires at 500ms; while that delivery is running, queue more
        let late = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(550)).await;
            late.submit("second").await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(1300)).await;
        let turns = sink.delivered_turns().await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "first");
        assert_eq!(turns[1].text, "second");
        assert_eq!(queue.state().await, QueueState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn attaching_resumes_an_existing_session() {
        let sink = MockSink::new();
        let queue = MessageQueue::new(sink.clone());
        queue.attach_to_chat("chat-7").await;

        queue.submit("picking this back up").await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        let turns = sink.delivered_turns().await;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].chat_id.as_deref(), Some("chat-7"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delivery_keeps_the_turn_queued() {
        let sink = MockSink::new();
        sink.fail_next.store(true, Ordering::SeqCst);
        let queue = MessageQueue::new(sink.clone());

        queue.submit("precious").await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(sink.delivered_turns().await.is_empty());

        // still previewable and flushable by hand
        let preview = queue.preview().await;
        assert_eq!(preview[0].id, PLACEHOLDER_QUEUED);
        let receipt = queue.flush_now().await.unwrap();
        assert_eq!(receipt.unwrap().message_id, "msg-0");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_clears_timer_and_content() {
        let sink = MockSink::new();
        let queue = MessageQueue::new(sink.clone());

        queue.submit("never mind").await.unwrap();
        queue.cancel_pending().await;
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert!(sink.delivered_turns().await.is_empty());
        assert_eq!(queue.state().await, QueueState::Idle);
        assert!(queue.preview().await.is_empty());
    }
}
