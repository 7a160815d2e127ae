use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::chunk::split_chunks;
use crate::config::TransferConfig;
use crate::envelope::MessageEnvelope;
use crate::events::{EventSink, TransferEvent};
use crate::protocol::{Application, Command, TransferError};
use crate::transport::{exchange, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    Initializing,
    SendingChunks,
    Completing,
    Error,
}

/// Successful end of a send pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOutcome {
    pub id: String,
    /// Zero for the unchunked path
    pub total_chunks: usize,
}

#[derive(Debug)]
struct ChunkSendSession {
    chunks: Vec<String>,
    total_length: usize,
    acked: BTreeSet<usize>,
    attempts: Vec<u32>,
    cursor: usize,
}

impl ChunkSendSession {
    fn new(chunks: Vec<String>, total_length: usize) -> Self {
        let total = chunks.len();
        Self {
            chunks,
            total_length,
            acked: BTreeSet::new(),
            attempts: vec![0; total],
            cursor: 0,
        }
    }

    fn total(&self) -> usize {
        self.chunks.len()
    }

    fn is_fully_acked(&self) -> bool {
        self.acked.len() == self.total()
    }

    /// Forget all acknowledgements so the next pass starts from CHUNK_INIT
    fn restart(&mut self) {
        self.acked.clear();
        self.attempts.iter_mut().for_each(|a| *a = 0);
        self.cursor = 0;
    }

    /// Forward from the cursor first; once every index was tried, the
    /// lowest unacknowledged index that still has attempts left.
    fn next_chunk(&mut self, max_attempts: u32) -> Option<usize> {
        while self.cursor < self.total() {
            let index = self.cursor;
            self.cursor += 1;
            if !self.acked.contains(&index) {
                return Some(index);
            }
        }
        (0..self.total()).find(|i| !self.acked.contains(i) && self.attempts[*i] < max_attempts)
    }
}

#[derive(Debug)]
enum Outgoing {
    Unchunked { id: String, json: String },
    Chunked { id: String, session: ChunkSendSession },
}

/// Initiator-side driver of a single outgoing message
#[derive(Debug)]
pub struct ChunkSender {
    config: TransferConfig,
    outgoing: Option<Outgoing>,
    state: SenderState,
    chunk_sends: usize,
}

impl ChunkSender {
    pub fn new(config: TransferConfig) -> Self {
        Self {
            config: config.sanitized(),
            outgoing: None,
            state: SenderState::Idle,
            chunk_sends: 0,
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn has_session(&self) -> bool {
        self.outgoing.is_some()
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.outgoing, Some(Outgoing::Chunked { .. }))
    }

    /// `(acked, total)` of a chunked session
    pub fn progress(&self) -> Option<(usize, usize)> {
        match &self.outgoing {
            Some(Outgoing::Chunked { session, .. }) => Some((session.acked.len(), session.total())),
            _ => None,
        }
    }

    /// CHUNK_DATA frames issued for the current message
    pub fn chunk_sends(&self) -> usize {
        self.chunk_sends
    }

    /// Wrap content in a fresh envelope and pick the send path. Returns the envelope id.
    pub fn prepare(&mut self, content: &str) -> serde_json::Result<String> {
        let envelope = MessageEnvelope::new(content);
        let json = envelope.to_json()?;
        let length = json.chars().count();
        let id = envelope.id;

        self.chunk_sends = 0;
        self.state = SenderState::Idle;
        self.outgoing = if length > self.config.max_chunk_size {
            let chunks = split_chunks(&json, self.config.max_chunk_size);
            info!("Message {} split into {} chunks ({} chars)", id, chunks.len(), length);
            Some(Outgoing::Chunked { id: id.clone(), session: ChunkSendSession::new(chunks, length) })
        } else {
            debug!("Message {} fits one frame ({} chars)", id, length);
            Some(Outgoing::Unchunked { id: id.clone(), json })
        };
        Ok(id)
    }

    /// Drop the session after an unrecoverable failure
    pub fn fail(&mut self) {
        self.outgoing = None;
        self.state = SenderState::Error;
    }

    pub fn reset(&mut self) {
        self.outgoing = None;
        self.state = SenderState::Idle;
        self.chunk_sends = 0;
    }

    /// Run one connection opportunity. Transient failures keep the
    /// session so the next pass resumes where this one stopped.
    pub async fn run_pass(
        &mut self,
        transport: &mut dyn Transport,
        events: &EventSink,
    ) -> Result<PassOutcome, TransferError> {
        let result = self.drive(transport, events).await;
        match &result {
            Ok(outcome) => {
                info!("Message {} delivered", outcome.id);
                self.outgoing = None;
                self.state = SenderState::Idle;
            }
            Err(TransferError::NoSession) => {}
            Err(e) if e.is_transient() => {
                debug!("Pass ended early: {}", e);
            }
            Err(e) => {
                warn!("Send failed: {}", e);
                self.fail();
            }
        }
        result
    }

    async fn drive(
        &mut self,
        transport: &mut dyn Transport,
        events: &EventSink,
    ) -> Result<PassOutcome, TransferError> {
        let timeout = self.config.transfer_timeout();
        let delay = self.config.chunk_delay();
        let max_attempts = self.config.max_attempts;
        let chunk_size = self.config.max_chunk_size;

        let outgoing = self.outgoing.as_mut().ok_or(TransferError::NoSession)?;

        let selected = exchange(transport, &Command::SelectApplication(Application::Transfer), timeout).await?;
        if !selected.is_success() {
            return Err(TransferError::Rejected("application selection"));
        }

        let (id, session) = match outgoing {
            Outgoing::Unchunked { id, json } => {
                let response = exchange(transport, &Command::SendData(json.clone()), timeout).await?;
                if !response.is_success() {
                    return Err(TransferError::Rejected("SEND_DATA"));
                }
                return Ok(PassOutcome { id: id.clone(), total_chunks: 0 });
            }
            Outgoing::Chunked { id, session } => (id.clone(), session),
        };
        let total = session.total();

        if session.is_fully_acked() {
            // Completion went out on an earlier link but its answer was lost
            self.state = SenderState::Completing;
            let response = exchange(transport, &Command::ChunkComplete, timeout).await?;
            if response.is_success() {
                return Ok(PassOutcome { id, total_chunks: total });
            }
            info!("Target has no session for {}, restarting from CHUNK_INIT", id);
            session.restart();
        }

        if session.acked.is_empty() {
            self.state = SenderState::Initializing;
            let init = Command::ChunkInit {
                total_length: session.total_length,
                chunk_size,
                total_chunks: total,
            };
            let response = exchange(transport, &init, timeout).await?;
            if !response.is_success() {
                return Err(TransferError::Rejected("CHUNK_INIT"));
            }
        }

        self.state = SenderState::SendingChunks;
        let budget = max_attempts as usize * total;
        let mut sent = 0;
        while !session.is_fully_acked() && sent < budget {
            let Some(index) = session.next_chunk(max_attempts) else {
                break;
            };
            if sent > 0 {
                tokio::time::sleep(delay).await;
            }

            session.attempts[index] += 1;
            sent += 1;
            self.chunk_sends += 1;

            let command = Command::ChunkData { index, text: session.chunks[index].clone() };
            let response = exchange(transport, &command, timeout).await?;
            match response.ack_index() {
                Some(acked) if acked < total => {
                    session.acked.insert(acked);
                }
                Some(acked) => warn!("Ignoring ack for out-of-range chunk {}", acked),
                None => debug!("Chunk {} not acknowledged (attempt {})", index, session.attempts[index]),
            }
            events.emit(TransferEvent::Progress { acked: session.acked.len(), total });
        }

        if !session.is_fully_acked() {
            return Err(TransferError::AttemptsExhausted { acked: session.acked.len(), total });
        }

        self.state = SenderState::Completing;
        let response = exchange(transport, &Command::ChunkComplete, timeout).await?;
        if !response.is_success() {
            return Err(TransferError::Rejected("CHUNK_COMPLETE"));
        }
        Ok(PassOutcome { id, total_chunks: total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use async_trait::async_trait;

    /// Records every frame and answers through a closure
    struct Scripted<F: FnMut(&Command) -> Vec<u8> + Send> {
        sent: Vec<Command>,
        answer: F,
    }

    #[async_trait]
    impl<F: FnMut(&Command) -> Vec<u8> + Send> Transport for Scripted<F> {
        async fn transceive(&mut self, frame: &[u8]) -> anyhow::Result<Vec<u8>> {
            let command = Command::decode(frame).map_err(anyhow::Error::new)?;
            let reply = (self.answer)(&command);
            self.sent.push(command);
            Ok(reply)
        }
    }

    fn config(max_chunk_size: usize) -> TransferConfig {
        TransferConfig { max_chunk_size, chunk_delay_ms: 0, ..Default::default() }
    }

    fn data_sends(sent: &[Command]) -> usize {
        sent.iter().filter(|c| matches!(c, Command::ChunkData { .. })).count()
    }

    #[tokio::test]
    async fn small_message_uses_send_data() {
        let (events, _rx) = EventSink::channel();
        let mut sender = ChunkSender::new(config(2048));
        let id = sender.prepare("hello").unwrap();
        assert!(!sender.is_chunked());

        let mut transport = Scripted { sent: vec![], answer: |_: &Command| vec![0x90, 0x00] };
        let outcome = sender.run_pass(&mut transport, &events).await.unwrap();
        assert_eq!(outcome, PassOutcome { id, total_chunks: 0 });
        assert_eq!(transport.sent.len(), 2);
        assert!(matches!(&transport.sent[1], Command::SendData(json) if json.contains("hello")));
        assert_eq!(sender.state(), SenderState::Idle);
    }

    #[tokio::test]
    async fn chunked_message_is_acked_and_completed() {
        let (events, _rx) = EventSink::channel();
        let mut sender = ChunkSender::new(config(8));
        sender.prepare("a message long enough to need chunks").unwrap();
        let (_, total) = sender.progress().unwrap();

        let mut transport = Scripted {
            sent: vec![],
            answer: |c: &Command| match c {
                Command::ChunkData { index, .. } => crate::protocol::Response::ack(*index).encode(),
                _ => vec![0x90, 0x00],
            },
        };
        let outcome = sender.run_pass(&mut transport, &events).await.unwrap();
        assert_eq!(outcome.total_chunks, total);
        assert!(matches!(transport.sent[1], Command::ChunkInit { chunk_size: 8, .. }));
        assert_eq!(data_sends(&transport.sent), total);
        assert_eq!(transport.sent.last(), Some(&Command::ChunkComplete));
        assert!(!sender.has_session());
    }

    #[tokio::test]
    async fn silent_target_bounds_chunk_sends() {
        let (events, _rx) = EventSink::channel();
        let mut sender = ChunkSender::new(config(4));
        sender.prepare("twenty-odd characters here").unwrap();
        let (_, total) = sender.progress().unwrap();

        let mut transport = Scripted { sent: vec![], answer: |_: &Command| vec![0x90, 0x00] };
        let err = sender.run_pass(&mut transport, &events).await.unwrap_err();
        assert!(matches!(err, TransferError::AttemptsExhausted { acked: 0, .. }));
        assert_eq!(data_sends(&transport.sent), 3 * total);

        // A later pass cannot exceed the bound either
        let _ = sender.run_pass(&mut transport, &events).await;
        assert_eq!(data_sends(&transport.sent), 3 * total);
        assert_eq!(sender.chunk_sends(), 3 * total);
    }

    #[tokio::test]
    async fn lagging_acks_are_credited_to_the_reported_index() {
        let (events, _rx) = EventSink::channel();
        let mut sender = ChunkSender::new(config(4));
        sender.prepare("lagging acknowledgements").unwrap();
        let (_, total) = sender.progress().unwrap();

        let mut last: Option<usize> = None;
        let mut transport = Scripted {
            sent: vec![],
            answer: move |c: &Command| match c {
                Command::ChunkData { index, .. } => {
                    let reply = match last {
                        Some(prev) => crate::protocol::Response::ack(prev).encode(),
                        None => vec![0x90, 0x00],
                    };
                    last = Some(*index);
                    reply
                }
                _ => vec![0x90, 0x00],
            },
        };
        sender.run_pass(&mut transport, &events).await.unwrap();
        assert!(data_sends(&transport.sent) > total);
        assert!(data_sends(&transport.sent) <= 3 * total);
    }

    #[tokio::test]
    async fn rejected_init_keeps_the_session() {
        let (events, _rx) = EventSink::channel();
        let mut sender = ChunkSender::new(config(4));
        sender.prepare("needs several chunks").unwrap();

        let mut transport = Scripted {
            sent: vec![],
            answer: |c: &Command| match c {
                Command::ChunkInit { .. } => vec![0x00, 0x00],
                _ => vec![0x90, 0x00],
            },
        };
        let err = sender.run_pass(&mut transport, &events).await.unwrap_err();
        assert!(matches!(err, TransferError::Rejected("CHUNK_INIT")));
        assert!(sender.has_session());
        assert_eq!(sender.state(), SenderState::Initializing);
    }

    #[tokio::test]
    async fn no_session_is_reported() {
        let (events, _rx) = EventSink::channel();
        let mut sender = ChunkSender::new(config(4));
        let mut transport = Scripted { sent: vec![], answer: |_: &Command| vec![0x90, 0x00] };
        assert!(matches!(sender.run_pass(&mut transport, &events).await, Err(TransferError::NoSession)));
    }
}
