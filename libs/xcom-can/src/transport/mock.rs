//! Mock CAN Driver for Testing
//!
//! In-memory bus end: records transmitted frames, delivers injected frames
//! and can simulate a device through a responder callback.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::traits::{CanDriver, CanFrame, DriverStats, TransportError};

/// Produces the frames a simulated device answers with
pub type Responder = Box<dyn Fn(&CanFrame) -> Vec<CanFrame> + Send + Sync>;

#[derive(Default)]
struct MockDriverState {
    /// Queue of frames to be received
    receive_queue: VecDeque<CanFrame>,
    /// History of sent frames
    sent_frames: Vec<CanFrame>,
    should_fail_send: bool,
    should_fail_receive: bool,
    responder: Option<Responder>,
    stats: DriverStats,
}

/// Mock driver implementation
pub struct MockCanDriver {
    name: String,
    state: Mutex<MockDriverState>,
    rx_ready: Notify,
    tx_done: Notify,
}

impl fmt::Debug for MockCanDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockCanDriver")
            .field("name", &self.name)
            .field("queued", &state.receive_queue.len())
            .field("sent", &state.sent_frames.len())
            .field("should_fail_send", &state.should_fail_send)
            .finish()
    }
}

impl Default for MockCanDriver {
    fn default() -> Self {
        Self::new("mock")
    }
}

impl MockCanDriver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MockDriverState::default()),
            rx_ready: Notify::new(),
            tx_done: Notify::new(),
        }
    }

    /// Create a shareable driver
    pub fn shared(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(name))
    }

    /// Queue a frame for the receive side
    pub fn inject(&self, frame: CanFrame) {
        self.state.lock().receive_queue.push_back(frame);
        self.rx_ready.notify_one();
    }

    /// Get all sent frames
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.state.lock().sent_frames.clone()
    }

    /// Clear all sent frames
    pub fn clear_sent(&self) {
        self.state.lock().sent_frames.clear();
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.state.lock().should_fail_send = fail;
    }

    pub fn set_fail_receive(&self, fail: bool) {
        self.state.lock().should_fail_receive = fail;
    }

    /// Answer every sent frame with the frames `responder` returns
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&CanFrame) -> Vec<CanFrame> + Send + Sync + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
    }

    pub fn clear_responder(&self) {
        self.state.lock().responder = None;
    }

    /// Wait until at least `count` frames were sent
    pub async fn wait_for_sent(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.tx_done.notified();
            if self.state.lock().sent_frames.len() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.state.lock().sent_frames.len() >= count;
            }
        }
    }
}

#[async_trait]
impl CanDriver for MockCanDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, frame: &CanFrame) -> Result<(), TransportError> {
        let replies = {
            let mut state = self.state.lock();
            if state.should_fail_send {
                state.stats.record_send_error();
                return Err(TransportError::SendFailed(
                    "Mock send failure".to_string(),
                ));
            }
            state.sent_frames.push(frame.clone());
            state.stats.record_sent();
            let replies = state
                .responder
                .as_ref()
                .map(|responder| responder(frame))
                .unwrap_or_default();
            state.receive_queue.extend(replies.iter().cloned());
            replies
        };

        debug!("Mock driver sent: {}", frame);
        self.tx_done.notify_waiters();
        for _ in &replies {
            self.rx_ready.notify_one();
        }
        Ok(())
    }

    async fn receive(&self, poll: Duration) -> Result<Option<CanFrame>, TransportError> {
        let deadline = Instant::now() + poll;
        loop {
            let notified = self.rx_ready.notified();
            {
                let mut state = self.state.lock();
                if state.should_fail_receive {
                    state.stats.record_receive_error();
                    return Err(TransportError::ReceiveFailed(
                        "Mock receive failure".to_string(),
                    ));
                }
                if let Some(frame) = state.receive_queue.pop_front() {
                    state.stats.record_received();
                    return Ok(Some(frame.received_now()));
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    fn stats(&self) -> DriverStats {
        self.state.lock().stats.clone()
    }
}
