//! Background enrichment tasks launched per run.
//!
//! At most three workers run concurrently with the model call: memory
//! extraction, cultural-knowledge extraction, and learning extraction. They
//! are started after the message sequence is built, joined before cleanup on
//! the happy path and on pause, and aborted without waiting on cancellation
//! or error. Worker failures never change the run's terminal status.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::agent::Agent;
use crate::error::DrummerError;
use crate::memory::UserMemory;
use crate::session::SessionRecord;
use crate::types::ModelMessage;

#[derive(Default)]
pub(crate) struct BackgroundTasks {
    memory: Option<JoinHandle<Result<Vec<UserMemory>, DrummerError>>>,
    cultural: Option<JoinHandle<Result<(), DrummerError>>>,
    learning: Option<JoinHandle<Result<(), DrummerError>>>,
    launched: bool,
}

impl BackgroundTasks {
    /// Launch the configured workers against a snapshot of the built message
    /// sequence. Workers still running from a previous attempt are reused.
    pub(crate) fn start(
        &mut self,
        agent: &Agent,
        messages: &Arc<Vec<ModelMessage>>,
        session: &SessionRecord,
        user_id: Option<&str>,
    ) {
        if let Some(extractor) = agent.memory_extractor.clone() {
            if self.memory.as_ref().map_or(true, JoinHandle::is_finished) {
                let messages = Arc::clone(messages);
                let user_id = user_id.map(str::to_string);
                self.memory = Some(tokio::spawn(async move {
                    extractor.extract(&messages, user_id.as_deref()).await
                }));
                self.launched = true;
            }
        }

        if let Some(extractor) = agent.cultural_knowledge_extractor.clone() {
            if self.cultural.as_ref().map_or(true, JoinHandle::is_finished) {
                let messages = Arc::clone(messages);
                self.cultural =
                    Some(tokio::spawn(
                        async move { extractor.extract(&messages).await },
                    ));
                self.launched = true;
            }
        }

        if let Some(extractor) = agent.learning_extractor.clone() {
            if self.learning.as_ref().map_or(true, JoinHandle::is_finished) {
                let messages = Arc::clone(messages);
                let session = session.clone();
                let user_id = user_id.map(str::to_string);
                self.learning = Some(tokio::spawn(async move {
                    extractor
                        .extract(&messages, &session, user_id.as_deref())
                        .await
                }));
                self.launched = true;
            }
        }
    }

    /// Whether any worker was launched this run.
    pub(crate) fn launched(&self) -> bool {
        self.launched
    }

    /// Join all workers, swallowing and logging failures. Returns the user
    /// memories produced this run, or `None` when no worker ran.
    ///
    /// Workers are joined in a fixed order (memory, cultural knowledge,
    /// learning); their relative completion order is undefined.
    pub(crate) async fn join(&mut self) -> Option<Vec<UserMemory>> {
        if !self.launched {
            return None;
        }
        let mut memories = Vec::new();

        if let Some(handle) = self.memory.take() {
            match handle.await {
                Ok(Ok(extracted)) => memories = extracted,
                Ok(Err(err)) => tracing::warn!(error = %err, "memory extraction failed"),
                Err(err) => tracing::warn!(error = %err, "memory task join failed"),
            }
        }
        if let Some(handle) = self.cultural.take() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "cultural knowledge extraction failed")
                }
                Err(err) => tracing::warn!(error = %err, "cultural knowledge task join failed"),
            }
        }
        if let Some(handle) = self.learning.take() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(error = %err, "learning extraction failed"),
                Err(err) => tracing::warn!(error = %err, "learning task join failed"),
            }
        }
        Some(memories)
    }

    /// Abort workers that have not finished, without waiting for them. Used
    /// on cancellation and error exits.
    pub(crate) fn abort_pending(&mut self) {
        for handle in [
            self.memory.take().map(|h| h.abort_handle()),
            self.cultural.take().map(|h| h.abort_handle()),
            self.learning.take().map(|h| h.abort_handle()),
        ]
        .into_iter()
        .flatten()
        {
            if !handle.is_finished() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct SlowMemory {
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl crate::memory::MemoryExtractor for SlowMemory {
        async fn extract(
            &self,
            _messages: &[ModelMessage],
            _user_id: Option<&str>,
        ) -> Result<Vec<UserMemory>, DrummerError> {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn abort_pending_does_not_wait_for_slow_workers() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut agent = crate::agent::tests::test_agent();
        agent.memory_extractor = Some(Arc::new(SlowMemory {
            finished: finished.clone(),
        }));

        let mut tasks = BackgroundTasks::default();
        let messages = Arc::new(vec![ModelMessage::user("hello")]);
        let session = SessionRecord::new("s1", None);
        tasks.start(&agent, &messages, &session, None);
        assert!(tasks.launched());

        let before = std::time::Instant::now();
        tasks.abort_pending();
        assert!(before.elapsed() < std::time::Duration::from_secs(1));
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn join_without_launch_returns_none() {
        let mut tasks = BackgroundTasks::default();
        assert!(tasks.join().await.is_none());
    }
}
