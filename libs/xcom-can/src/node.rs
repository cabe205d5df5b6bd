//! Xcom-CAN protocol node
//!
//! Owns the service registry, the correlation table and the notification
//! sink, and drives one receive loop over a [`CanDriver`].
//!
//! Every inbound frame goes through:
//!
//! ```text
//! Received -> Parsed -> Routed -> Delivered | Dropped | Errored
//! ```
//!
//! Frames for other participants, unknown services and undecodable payloads
//! are dropped with a trace/warn log. Error frames resolve the matching call
//! with a [`ProtocolError`]; responses resolve it with the decoded value;
//! notifications are appended to the sink.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::addresses::Address;
use crate::codec::{Inbound, Request, Response, ServiceMessage};
use crate::correlation::CorrelationTable;
use crate::error::{Result, XcomError};
use crate::fault::ProtocolError;
use crate::identifier::FrameId;
use crate::notifications::{NotificationRecord, NotificationSink};
use crate::registry::ServiceRegistry;
use crate::transport::{CanDriver, CanFrame};

/// Default receive poll interval
pub const DEFAULT_RX_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Terminal state of one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Delivered,
    Dropped(DropReason),
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Standard 11-bit identifier
    NotExtended,
    /// Addressed to neither this node nor the RCC group
    ForeignDestination,
    /// Service id not registered
    UnknownService,
    /// Payload shorter than the service layout
    Undecodable,
    /// Valid response or error frame that no pending call was waiting for
    NoWaiter,
}

/// Frame the node should transmit after handling an inbound frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reply {
    pub destination: Address,
    pub message: ServiceMessage,
}

/// Result of dispatching one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dispatch {
    pub outcome: FrameOutcome,
    pub reply: Option<Reply>,
}

impl Dispatch {
    fn new(outcome: FrameOutcome) -> Self {
        Self {
            outcome,
            reply: None,
        }
    }
}

/// Builds an answer to a delivered frame, sent back to its source
pub trait ReplyHandler: Send + Sync {
    fn reply(&self, source: Address, inbound: &Inbound) -> Option<ServiceMessage>;
}

impl<F> ReplyHandler for F
where
    F: Fn(Address, &Inbound) -> Option<ServiceMessage> + Send + Sync,
{
    fn reply(&self, source: Address, inbound: &Inbound) -> Option<ServiceMessage> {
        self(source, inbound)
    }
}

/// Node counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStats {
    pub frames_received: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub frames_errored: u64,
    pub frames_sent: u64,
    pub requests_sent: u64,
    pub timeouts: u64,
    pub send_errors: u64,
    pub receive_errors: u64,
}

impl NodeStats {
    fn record_outcome(&mut self, outcome: FrameOutcome) {
        match outcome {
            FrameOutcome::Delivered => self.frames_delivered += 1,
            FrameOutcome::Dropped(_) => self.frames_dropped += 1,
            FrameOutcome::Errored => self.frames_errored += 1,
        }
    }
}

struct RxTask {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

pub struct XcomNode {
    address: Address,
    driver: Arc<dyn CanDriver>,
    registry: ServiceRegistry,
    pending: Arc<CorrelationTable>,
    notifications: NotificationSink,
    reply_handler: Option<Box<dyn ReplyHandler>>,
    rx_poll_interval: Duration,
    stats: Mutex<NodeStats>,
    rx_task: Mutex<Option<RxTask>>,
}

impl fmt::Debug for XcomNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XcomNode")
            .field("address", &self.address)
            .field("driver", &self.driver.name())
            .field("registry", &self.registry)
            .field("pending", &self.pending.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl XcomNode {
    /// Node at `address` serving every public service
    pub fn new(driver: Arc<dyn CanDriver>, address: Address) -> Self {
        Self {
            address,
            driver,
            registry: ServiceRegistry::public(),
            pending: CorrelationTable::new(),
            notifications: NotificationSink::new(),
            reply_handler: None,
            rx_poll_interval: DEFAULT_RX_POLL_INTERVAL,
            stats: Mutex::new(NodeStats::default()),
            rx_task: Mutex::new(None),
        }
    }

    pub fn with_registry(mut self, registry: ServiceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_rx_poll_interval(mut self, interval: Duration) -> Self {
        self.rx_poll_interval = interval;
        self
    }

    pub fn with_reply_handler(mut self, handler: impl ReplyHandler + 'static) -> Self {
        self.reply_handler = Some(Box::new(handler));
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.rx_task.lock().is_some()
    }

    /// Number of calls waiting for an answer
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> NodeStats {
        self.stats.lock().clone()
    }

    /// Snapshot of every notification received so far, in arrival order
    pub fn notifications(&self) -> Vec<NotificationRecord> {
        self.notifications.snapshot()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the receive loop; no-op when already running
    pub fn start(self: &Arc<Self>) {
        let mut rx_task = self.rx_task.lock();
        if rx_task.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let task_token = token.clone();
        let node = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let poll = node.rx_poll_interval;
            loop {
                tokio::select! {
                    () = task_token.cancelled() => {
                        debug!("Receive loop on {} cancelled", node.driver.name());
                        break;
                    }
                    received = node.driver.receive(poll) => match received {
                        Ok(Some(frame)) => {
                            node.handle_rx_frame(&frame).await;
                        },
                        Ok(None) => {},
                        Err(e) => {
                            node.stats.lock().receive_errors += 1;
                            warn!("Receive failed on {}: {}", node.driver.name(), e);
                            tokio::time::sleep(poll).await;
                        },
                    }
                }
            }
        });

        info!(
            "Xcom-CAN node {} started on {}",
            self.address,
            self.driver.name()
        );
        *rx_task = Some(RxTask { handle, token });
    }

    /// Cancel the receive loop and wait for it to finish
    ///
    /// Calls still waiting fail with [`XcomError::NotStarted`].
    pub async fn stop(&self) {
        let Some(task) = self.rx_task.lock().take() else {
            return;
        };
        task.token.cancel();
        if let Err(e) = task.handle.await {
            warn!("Receive loop ended abnormally: {}", e);
        }
        let abandoned = self.pending.close_all();
        if abandoned > 0 {
            debug!("{} pending calls abandoned on stop", abandoned);
        }
        info!("Xcom-CAN node {} stopped", self.address);
    }

    /// Signal the receive loop to stop without waiting for it
    pub(crate) fn cancel(&self) {
        if let Some(task) = self.rx_task.lock().take() {
            task.token.cancel();
            self.pending.close_all();
        }
    }

    // ========================================================================
    // Transmit path
    // ========================================================================

    /// Encode `message` and send it from this node to `destination`
    pub async fn send_service(&self, destination: Address, message: &ServiceMessage) -> Result<()> {
        let id = FrameId::new(destination, self.address, message.kind().service_id(), 0)?;
        let payload = message.encode();
        let frame = CanFrame::new_extended(id.raw(), &payload)?;

        debug!("-> tx: {:?} to address {}", message, destination);
        trace!("-> tx frame: {}", frame);

        if let Err(e) = self.driver.send(&frame).await {
            self.stats.lock().send_errors += 1;
            return Err(e.into());
        }
        self.stats.lock().frames_sent += 1;
        Ok(())
    }

    /// Send `request` to `destination` and wait for the matching answer
    ///
    /// Fails with `Timeout` when nothing matching arrives in time, with
    /// `Protocol` when the device answers with an error frame, and with
    /// `Transport` when the frame could not be sent.
    pub async fn wait_response(
        &self,
        destination: Address,
        request: Request,
        timeout: Duration,
    ) -> Result<Response> {
        if !self.is_running() {
            return Err(XcomError::NotStarted);
        }

        // Registered before sending so a fast answer cannot be missed
        let call = self
            .pending
            .begin(request.kind(), destination, request.object_id());
        self.send_service(destination, &ServiceMessage::Request(request))
            .await?;
        self.stats.lock().requests_sent += 1;

        let result = call.wait(timeout).await;
        if let Err(e) = &result {
            if e.is_timeout() {
                self.stats.lock().timeouts += 1;
                debug!("{}", e);
            }
        }
        result
    }

    // ========================================================================
    // Receive path
    // ========================================================================

    /// Dispatch one frame and transmit the reply it produced, if any
    pub async fn handle_rx_frame(&self, frame: &CanFrame) -> FrameOutcome {
        let Dispatch { outcome, reply } = self.dispatch(frame);
        if let Some(reply) = reply {
            if let Err(e) = self.send_service(reply.destination, &reply.message).await {
                warn!("Failed to reply to address {}: {}", reply.destination, e);
            }
        }
        outcome
    }

    /// Route one inbound frame without blocking
    pub fn dispatch(&self, frame: &CanFrame) -> Dispatch {
        let dispatch = self.route(frame);
        let mut stats = self.stats.lock();
        stats.frames_received += 1;
        stats.record_outcome(dispatch.outcome);
        dispatch
    }

    fn route(&self, frame: &CanFrame) -> Dispatch {
        if !frame.is_extended {
            trace!("Dropping standard frame {}", frame);
            return Dispatch::new(FrameOutcome::Dropped(DropReason::NotExtended));
        }

        let id = FrameId::from_raw(frame.id);
        if id.destination != self.address && id.destination != Address::RCC_GROUP {
            trace!("Dropping frame for address {}: {}", id.destination, frame);
            return Dispatch::new(FrameOutcome::Dropped(DropReason::ForeignDestination));
        }

        let Some(kind) = self.registry.lookup(id.service_id) else {
            trace!("Dropping frame with unregistered service {}: {}", id.service_id, frame);
            return Dispatch::new(FrameOutcome::Dropped(DropReason::UnknownService));
        };

        let data = frame.payload();
        if id.is_error() {
            return match ProtocolError::decode(data) {
                Ok(error) => {
                    debug!(
                        "<- rx: {} from address {} to {}",
                        error, id.source, id.destination
                    );
                    if self.pending.resolve(kind, id.source, None, Err(error)) {
                        Dispatch::new(FrameOutcome::Errored)
                    } else {
                        Dispatch::new(FrameOutcome::Dropped(DropReason::NoWaiter))
                    }
                },
                Err(e) => {
                    warn!("Undecodable error frame {}: {}", frame, e);
                    Dispatch::new(FrameOutcome::Dropped(DropReason::Undecodable))
                },
            };
        }

        let inbound = match Inbound::decode(kind, data) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("Undecodable {} frame {}: {}", kind, frame, e);
                return Dispatch::new(FrameOutcome::Dropped(DropReason::Undecodable));
            },
        };
        debug!(
            "<- rx: {:?} from address {} to {}",
            inbound, id.source, id.destination
        );

        let outcome = match inbound {
            Inbound::Response(response) => {
                let object_id = Some(response.object_id());
                if self.pending.resolve(kind, id.source, object_id, Ok(response)) {
                    FrameOutcome::Delivered
                } else {
                    FrameOutcome::Dropped(DropReason::NoWaiter)
                }
            },
            Inbound::Notification(notification) => {
                self.notifications
                    .append(NotificationRecord::new(id.source, notification));
                FrameOutcome::Delivered
            },
        };

        let reply = match (outcome, &self.reply_handler) {
            (FrameOutcome::Delivered, Some(handler)) => {
                handler.reply(id.source, &inbound).map(|message| Reply {
                    destination: id.source,
                    message,
                })
            },
            _ => None,
        };

        Dispatch { outcome, reply }
    }
}
