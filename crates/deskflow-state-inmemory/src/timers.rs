//! In-memory wake timer
//!
//! A background task polls the due-time map and pushes fired run IDs onto
//! an mpsc channel. The receiving side is expected to call
//! `RunScheduler::resume` for each fired run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use deskflow_core::domain::run::{RunId, WakeToken};
use deskflow_core::{EngineError, WakeTimerRepository};

/// In-memory implementation of the wake-timer collaborator
pub struct InMemoryWakeTimer {
    timers: Arc<DashMap<String, (DateTime<Utc>, RunId)>>,
    fired_tx: mpsc::Sender<RunId>,
}

impl InMemoryWakeTimer {
    /// Create the timer and the channel its fired wakes arrive on
    pub fn new() -> (Self, mpsc::Receiver<RunId>) {
        let (fired_tx, fired_rx) = mpsc::channel(32);

        let timer = Self {
            timers: Arc::new(DashMap::with_capacity(32)),
            fired_tx,
        };

        // Poll for due timers
        let timers_ref = timer.timers.clone();
        let tx_ref = timer.fired_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(50)).await;

                let now = Utc::now();
                let due: Vec<(String, RunId)> = timers_ref
                    .iter()
                    .filter(|entry| entry.value().0 <= now)
                    .map(|entry| (entry.key().clone(), entry.value().1.clone()))
                    .collect();

                for (token, run_id) in due {
                    timers_ref.remove(&token);
                    tracing::debug!(run = %run_id.0, "wake timer fired");
                    if tx_ref.send(run_id).await.is_err() {
                        // Receiver dropped, likely shutdown
                        return;
                    }
                }
            }
        });

        (timer, fired_rx)
    }
}

#[async_trait]
impl WakeTimerRepository for InMemoryWakeTimer {
    async fn schedule(&self, run_id: &RunId, at: DateTime<Utc>) -> Result<WakeToken, EngineError> {
        let token = uuid::Uuid::new_v4().to_string();
        self.timers
            .insert(token.clone(), (at, run_id.clone()));
        Ok(WakeToken(token))
    }

    async fn cancel(&self, token: &WakeToken) -> Result<(), EngineError> {
        self.timers.remove(&token.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_due_timer_fires_on_the_channel() {
        let (timer, mut fired) = InMemoryWakeTimer::new();
        let run_id = RunId("run-1".to_string());

        timer.schedule(&run_id, Utc::now()).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), fired.recv())
            .await
            .expect("timer did not fire in time")
            .expect("channel closed");
        assert_eq!(received, run_id);
    }

    #[tokio::test]
    async fn test_cancelled_timer_does_not_fire() {
        let (timer, mut fired) = InMemoryWakeTimer::new();
        let run_id = RunId("run-2".to_string());

        let token = timer
            .schedule(&run_id, Utc::now() + chrono::Duration::milliseconds(100))
            .await
            .unwrap();
        timer.cancel(&token).await.unwrap();

        let result = tokio::time::timeout(Duration::from_millis(400), fired.recv()).await;
        assert!(result.is_err(), "cancelled timer fired anyway");
    }

    #[tokio::test]
    async fn test_future_timer_waits_for_its_due_time() {
        let (timer, mut fired) = InMemoryWakeTimer::new();
        let run_id = RunId("run-3".to_string());

        timer
            .schedule(&run_id, Utc::now() + chrono::Duration::milliseconds(200))
            .await
            .unwrap();

        // Not yet due
        let early = tokio::time::timeout(Duration::from_millis(50), fired.recv()).await;
        assert!(early.is_err());

        // Due now
        let received = tokio::time::timeout(Duration::from_secs(2), fired.recv())
            .await
            .expect("timer did not fire in time")
            .expect("channel closed");
        assert_eq!(received, run_id);
    }
}
