use tokio::time::Instant;
use tracing::{debug, info};

use crate::chunk::ChunkReceiver;
use crate::config::TransferConfig;
use crate::envelope::{interpret, parse_envelope, preview, DedupFilter, Delivery};
use crate::events::{EventSink, TransferEvent};
use crate::ndef::FileEngine;
use crate::protocol::{Application, Command, Response};
use crate::transport::FrameHandler;

/// Target-side router from decoded frames to their handlers
#[derive(Debug)]
pub struct CommandDispatcher {
    application_selected: bool,
    staged: Option<String>,
    receiver: ChunkReceiver,
    files: FileEngine,
    dedup: DedupFilter,
    events: EventSink,
    display_limit: usize,
}

impl CommandDispatcher {
    pub fn new(config: &TransferConfig, events: EventSink) -> Self {
        Self {
            application_selected: false,
            staged: None,
            receiver: ChunkReceiver::new(config.transfer_timeout()),
            files: FileEngine::new(),
            dedup: DedupFilter::new(),
            events,
            display_limit: config.display_limit,
        }
    }

    /// Content returned by GET_DATA and served from the NDEF data file
    pub fn stage(&mut self, content: impl Into<String>) {
        self.staged = Some(content.into());
    }

    pub fn clear_staged(&mut self) {
        self.staged = None;
    }

    pub fn staged(&self) -> Option<&str> {
        self.staged.as_deref()
    }

    pub fn is_application_selected(&self) -> bool {
        self.application_selected
    }

    pub fn receiver(&self) -> &ChunkReceiver {
        &self.receiver
    }

    pub fn files(&self) -> &FileEngine {
        &self.files
    }

    /// Expire an idle chunk session
    pub fn poll_timers(&mut self, now: Instant) {
        if self.receiver.expire_idle(now) {
            self.events.status("Incoming transfer timed out");
        }
    }

    pub fn reset(&mut self) {
        self.application_selected = false;
        self.receiver.reset();
        self.files = FileEngine::new();
    }

    /// Answer one frame. Never fails: undecodable input yields UNKNOWN.
    pub fn handle(&mut self, frame: &[u8]) -> Vec<u8> {
        self.dispatch(frame).encode()
    }

    fn dispatch(&mut self, frame: &[u8]) -> Response {
        let command = match Command::decode(frame) {
            Ok(command) => command,
            Err(e) => {
                debug!("Unrecognized frame ({} bytes): {}", frame.len(), e);
                return Response::unknown();
            }
        };
        debug!("Dispatching {}", command.name());

        match command {
            Command::SelectApplication(Application::Transfer) => {
                self.application_selected = true;
                Response::success()
            }
            Command::GetData => {
                let content = self.staged.as_deref().unwrap_or_default();
                Response::with_payload(content.as_bytes().to_vec())
            }
            Command::SendData(json) => {
                if let Some(delivery) = parse_envelope(&json) {
                    self.deliver(delivery);
                }
                Response::success()
            }
            command @ (Command::ChunkInit { .. }
            | Command::ChunkData { .. }
            | Command::ChunkAck { .. }
            | Command::ChunkComplete) => {
                let announces = matches!(command, Command::ChunkInit { .. });
                let outcome = self.receiver.handle(command);
                if announces && outcome.response.is_success() {
                    if let Some((_, total)) = self.receiver.progress() {
                        self.events.status(format!("Receiving message in {} chunks", total));
                    }
                }
                if let Some(text) = outcome.completed {
                    self.deliver_text(&text);
                }
                outcome.response
            }
            command @ (Command::SelectApplication(Application::Ndef)
            | Command::SelectFile(_)
            | Command::ReadBinary { .. }
            | Command::UpdateBinary { .. }) => {
                let outcome = self.files.handle(command, self.staged.as_deref());
                for text in outcome.messages {
                    self.deliver(Delivery { content: text, id: None });
                }
                outcome.response
            }
        }
    }

    fn deliver_text(&mut self, text: &str) {
        if let Some(delivery) = interpret(text) {
            self.deliver(delivery);
        }
    }

    fn deliver(&mut self, delivery: Delivery) {
        if !self.dedup.admit(&delivery) {
            return;
        }
        info!("Delivering message: {}", preview(&delivery.content, self.display_limit));
        self.events.emit(TransferEvent::Delivered(delivery));
    }
}

impl FrameHandler for CommandDispatcher {
    fn handle_frame(&mut self, frame: &[u8]) -> Vec<u8> {
        self.handle(frame)
    }
}
