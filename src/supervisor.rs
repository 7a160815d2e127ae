use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::chunk::{ChunkSender, PassOutcome};
use crate::config::TransferConfig;
use crate::dispatcher::CommandDispatcher;
use crate::envelope::{preview, Delivery};
use crate::events::{EventSink, TransferEvent};
use crate::protocol::{Application, Command, Response, TransferError};
use crate::transport::{exchange, FrameHandler, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Idle,
    Sending,
    Receiving,
}

/// Deadline of the single retry window
#[derive(Debug, Default)]
struct RetryState {
    deadline: Option<Instant>,
}

impl RetryState {
    fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    fn arm(&mut self, now: Instant, timeout: Duration) {
        self.deadline = Some(now + timeout);
    }

    fn cancel(&mut self) {
        self.deadline = None;
    }

    fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

/// Owner of the one active session on a link
#[derive(Debug)]
pub struct TransferSupervisor {
    config: TransferConfig,
    role: Role,
    dispatcher: CommandDispatcher,
    sender: ChunkSender,
    retry: RetryState,
    events: EventSink,
}

impl TransferSupervisor {
    pub fn new(config: TransferConfig, events: EventSink) -> Self {
        let config = config.sanitized();
        Self {
            dispatcher: CommandDispatcher::new(&config, events.clone()),
            sender: ChunkSender::new(config.clone()),
            retry: RetryState::default(),
            role: Role::Idle,
            config,
            events,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn sender(&self) -> &ChunkSender {
        &self.sender
    }

    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry.deadline
    }

    /// Take the emulated-target role
    pub fn listen(&mut self, staged: Option<String>) {
        self.abandon_send();
        match staged {
            Some(content) => {
                info!("Listening with staged content: {}", preview(&content, self.config.display_limit));
                self.dispatcher.stage(content);
            }
            None => self.dispatcher.clear_staged(),
        }
        self.role = Role::Receiving;
        self.events.status("Waiting for initiator");
    }

    /// Take the sender role with a new message. Returns the envelope id.
    pub fn queue_message(&mut self, content: &str) -> anyhow::Result<String> {
        self.dispatcher.reset();
        self.retry.cancel();
        let id = self.sender.prepare(content)?;
        self.role = Role::Sending;
        self.events.status(format!("Ready to send: {}", preview(content, self.config.display_limit)));
        Ok(id)
    }

    /// One connection opportunity in the sender role
    pub async fn on_connection(&mut self, transport: &mut dyn Transport) -> Result<PassOutcome, TransferError> {
        if self.role != Role::Sending {
            debug!("Connection while {:?}, nothing to send", self.role);
            return Err(TransferError::NoSession);
        }
        if let Some(e) = self.poll_timers() {
            return Err(e);
        }

        let acked_before = self.acked();
        if self.retry.is_active() {
            info!("Reconnected during retry window, resuming");
        }
        self.events.status("Connected, sending");

        match self.sender.run_pass(transport, &self.events).await {
            Ok(outcome) => {
                self.retry.cancel();
                self.role = Role::Idle;
                self.events.emit(TransferEvent::Completed { id: outcome.id.clone() });
                self.events.status("Message sent");
                Ok(outcome)
            }
            Err(e) if e.is_transient() => {
                if self.acked() > acked_before {
                    self.retry.cancel();
                }
                self.on_transport_error(e.clone());
                Err(e)
            }
            Err(e) => {
                self.abort(e.clone());
                Err(e)
            }
        }
    }

    /// Link failure outside or during a pass. Arms the retry window once,
    /// or fails hard when retrying is disabled.
    pub fn on_transport_error(&mut self, e: TransferError) {
        if self.role != Role::Sending {
            return;
        }
        let Some(timeout) = self.config.retry_timeout() else {
            warn!("Retry disabled, giving up: {}", e);
            self.abort(e);
            return;
        };
        if self.retry.is_active() {
            debug!("Retry already pending, absorbing: {}", e);
            return;
        }
        warn!("Transfer interrupted ({}), retrying for {:?}", e, timeout);
        self.retry.arm(Instant::now(), timeout);
        self.events.status("Connection lost, waiting to retry");
    }

    /// Fire due timers. Returns the error when the retry window expired.
    pub fn poll_timers(&mut self) -> Option<TransferError> {
        let now = Instant::now();
        self.dispatcher.poll_timers(now);
        if self.retry.expired(now) {
            self.abort(TransferError::RetryExpired);
            return Some(TransferError::RetryExpired);
        }
        None
    }

    /// Pull the target's staged content with GET_DATA
    pub async fn fetch(&mut self, transport: &mut dyn Transport) -> Result<String, TransferError> {
        let timeout = self.config.transfer_timeout();
        let selected = exchange(transport, &Command::SelectApplication(Application::Transfer), timeout).await?;
        if !selected.is_success() {
            return Err(TransferError::Rejected("application selection"));
        }
        let response = exchange(transport, &Command::GetData, timeout).await?;
        if !response.is_success() {
            return Err(TransferError::Rejected("GET_DATA"));
        }
        let content = String::from_utf8(response.payload)
            .map_err(|_| TransferError::Transport("GET_DATA payload is not UTF-8".to_string()))?;
        self.events.emit(TransferEvent::Delivered(Delivery { content: content.clone(), id: None }));
        Ok(content)
    }

    pub fn reset(&mut self) {
        self.abandon_send();
        self.dispatcher.reset();
        self.role = Role::Idle;
        self.events.status("Reset");
    }

    fn acked(&self) -> usize {
        self.sender.progress().map(|(acked, _)| acked).unwrap_or(0)
    }

    fn abandon_send(&mut self) {
        self.sender.reset();
        self.retry.cancel();
    }

    fn abort(&mut self, e: TransferError) {
        error!("Transfer aborted: {}", e);
        // Error state stays visible until the next queue_message or reset
        self.retry.cancel();
        self.sender.fail();
        self.role = Role::Idle;
        self.events.emit(TransferEvent::Error(e));
    }
}

impl FrameHandler for TransferSupervisor {
    fn handle_frame(&mut self, frame: &[u8]) -> Vec<u8> {
        if self.role != Role::Receiving {
            debug!("Frame received while {:?}", self.role);
            return Response::unknown().encode();
        }
        self.dispatcher.handle(frame)
    }
}
