//! Fire-and-forget persistence.
//!
//! Read loops hand messages to a bounded queue drained by one background
//! worker. Failures are logged and never retried; a full queue drops the job.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::db::messages::MessageStore;

use super::envelope::ChatEnvelope;

const SINK_QUEUE_CAPACITY: usize = 4096;

#[derive(Debug)]
enum SinkJob {
    Save(Arc<ChatEnvelope>),
    MarkPinned(String),
}

#[derive(Clone)]
pub struct PersistenceSink {
    tx: mpsc::Sender<SinkJob>,
}

impl PersistenceSink {
    /// Start the worker. It exits once every sink handle is dropped.
    pub fn spawn(store: Arc<dyn MessageStore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(SINK_QUEUE_CAPACITY);
        let worker = tokio::spawn(run(store, rx));
        (Self { tx }, worker)
    }

    pub fn save(&self, envelope: Arc<ChatEnvelope>) {
        self.submit(SinkJob::Save(envelope));
    }

    pub fn mark_pinned(&self, message_id: impl Into<String>) {
        self.submit(SinkJob::MarkPinned(message_id.into()));
    }

    fn submit(&self, job: SinkJob) {
        if let Err(e) = self.tx.try_send(job) {
            tracing::error!(error = %e, "persistence queue rejected job");
        }
    }
}

async fn run(store: Arc<dyn MessageStore>, mut rx: mpsc::Receiver<SinkJob>) {
    while let Some(job) = rx.recv().await {
        match job {
            SinkJob::Save(envelope) => {
                if let Err(e) = store.save(&envelope).await {
                    tracing::error!(
                        error = %e,
                        message_id = ?envelope.message_id,
                        target_id = %envelope.target_id,
                        "failed to persist chat message"
                    );
                }
            }
            SinkJob::MarkPinned(message_id) => {
                if let Err(e) = store.mark_pinned(&message_id).await {
                    tracing::error!(error = %e, %message_id, "failed to persist pin");
                }
            }
        }
    }
    tracing::debug!("persistence worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::messages::MemoryMessageStore;
    use crate::gateway::envelope::{ChatEvent, ChatMode, MessageBody};

    #[tokio::test]
    async fn saves_in_background_and_stops_when_dropped() {
        let store = Arc::new(MemoryMessageStore::new());
        let (sink, worker) = PersistenceSink::spawn(store.clone());

        let mut env = ChatEnvelope::new(
            ChatMode::Live,
            "r1",
            ChatEvent::Message(MessageBody {
                sequence: Some(1),
                content: "hello".into(),
                ..Default::default()
            }),
        )
        .with_message_id("77");
        env.sender_id = Some("u1".into());

        sink.save(Arc::new(env));
        sink.mark_pinned("77");
        // Refused by the store; logged, not fatal.
        sink.save(Arc::new(ChatEnvelope::error(ChatMode::Live, "r1", "x", "y")));

        drop(sink);
        worker.await.unwrap();

        let row = store.get(77).unwrap();
        assert_eq!(row.content, "hello");
        assert!(row.pinned);
        assert_eq!(store.len(), 1);
    }
}
