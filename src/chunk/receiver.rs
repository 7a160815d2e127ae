use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::protocol::{Command, Response};

#[derive(Debug)]
struct ChunkReceiveSession {
    declared_total_length: usize,
    chunk_size: usize,
    total_chunks: usize,
    buffer: HashMap<usize, String>,
    received_count: usize,
    last_activity: Instant,
}

impl ChunkReceiveSession {
    fn missing(&self) -> Vec<usize> {
        (0..self.total_chunks)
            .filter(|i| !self.buffer.contains_key(i))
            .collect()
    }

    fn assemble(&self) -> String {
        let mut text = String::with_capacity(self.declared_total_length);
        for i in 0..self.total_chunks {
            if let Some(chunk) = self.buffer.get(&i) {
                text.push_str(chunk);
            }
        }
        text
    }
}

/// Result of one chunk command
#[derive(Debug)]
pub struct ChunkOutcome {
    pub response: Response,
    /// Reassembled text, set only by a successful completion
    pub completed: Option<String>,
}

impl ChunkOutcome {
    fn reply(response: Response) -> Self {
        Self { response, completed: None }
    }
}

/// Target-side accumulator of chunked transfers
#[derive(Debug)]
pub struct ChunkReceiver {
    session: Option<ChunkReceiveSession>,
    inactivity_timeout: Duration,
}

impl ChunkReceiver {
    pub fn new(inactivity_timeout: Duration) -> Self {
        Self { session: None, inactivity_timeout }
    }

    pub fn is_receiving(&self) -> bool {
        self.session.is_some()
    }

    /// `(received, total)` of the open session
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.session.as_ref().map(|s| (s.received_count, s.total_chunks))
    }

    pub fn handle(&mut self, command: Command) -> ChunkOutcome {
        self.handle_at(command, Instant::now())
    }

    pub fn handle_at(&mut self, command: Command, now: Instant) -> ChunkOutcome {
        self.expire_idle(now);

        match command {
            Command::ChunkInit { total_length, chunk_size, total_chunks } => {
                if chunk_size == 0 || total_chunks == 0 {
                    warn!("Rejecting chunk init with size={} chunks={}", chunk_size, total_chunks);
                    return ChunkOutcome::reply(Response::unknown());
                }
                if let Some(old) = &self.session {
                    warn!("Chunk init replaces open session ({}/{} received)", old.received_count, old.total_chunks);
                }
                info!("Receiving chunked message: length={}, chunk_size={}, chunks={}", total_length, chunk_size, total_chunks);
                self.session = Some(ChunkReceiveSession {
                    declared_total_length: total_length,
                    chunk_size,
                    total_chunks,
                    buffer: HashMap::with_capacity(total_chunks),
                    received_count: 0,
                    last_activity: now,
                });
                ChunkOutcome::reply(Response::success())
            }

            Command::ChunkData { index, text } => {
                let Some(session) = self.session.as_mut() else {
                    warn!("Chunk {} received with no open session", index);
                    return ChunkOutcome::reply(Response::unknown());
                };
                if index >= session.total_chunks {
                    warn!("Chunk index {} out of range (total {})", index, session.total_chunks);
                    return ChunkOutcome::reply(Response::unknown());
                }
                if text.chars().count() > session.chunk_size {
                    debug!("Chunk {} longer than announced size {}", index, session.chunk_size);
                }
                if session.buffer.insert(index, text).is_none() {
                    session.received_count += 1;
                }
                session.last_activity = now;
                debug!("Stored chunk {} ({}/{})", index, session.received_count, session.total_chunks);
                ChunkOutcome::reply(Response::ack(index))
            }

            Command::ChunkComplete => {
                let Some(session) = self.session.as_mut() else {
                    warn!("Chunk completion with no open session");
                    return ChunkOutcome::reply(Response::unknown());
                };
                session.last_activity = now;

                let missing = session.missing();
                if !missing.is_empty() {
                    warn!("Cannot complete, missing chunks {:?}", missing);
                    return ChunkOutcome::reply(Response::unknown());
                }

                let text = session.assemble();
                let assembled_len = text.chars().count();
                if assembled_len != session.declared_total_length {
                    warn!("Assembled {} chars, init declared {}", assembled_len, session.declared_total_length);
                }
                info!("Chunked message complete: {} chunks, {} chars", session.total_chunks, assembled_len);
                self.session = None;
                ChunkOutcome { response: Response::success(), completed: Some(text) }
            }

            other => {
                debug!("{} is not handled by the chunk receiver", other.name());
                ChunkOutcome::reply(Response::unknown())
            }
        }
    }

    /// Drop a session idle for longer than the transfer timeout
    pub fn expire_idle(&mut self, now: Instant) -> bool {
        let expired = self
            .session
            .as_ref()
            .is_some_and(|s| now.saturating_duration_since(s.last_activity) > self.inactivity_timeout);
        if expired {
            warn!("Chunk session idle for more than {:?}, discarding", self.inactivity_timeout);
            self.session = None;
        }
        expired
    }

    pub fn reset(&mut self) {
        if self.session.take().is_some() {
            info!("Chunk receive session reset");
        }
    }
}
