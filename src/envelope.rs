use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

static ENVELOPE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Logical message: content plus the token used for re-delivery suppression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub content: String,
    pub id: String,
}

impl MessageEnvelope {
    /// Wrap content with a freshly generated id
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        let id = generate_id(&content);
        Self { content, id }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

fn generate_id(content: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = ENVELOPE_COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update(nanos.to_be_bytes());
    hasher.update(seq.to_be_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Text handed to the delivery callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub content: String,
    /// Envelope id, absent for plain-text payloads
    pub id: Option<String>,
}

/// Interpret reassembled chunk text as an envelope when it looks like one.
///
/// Text starting with `{` must parse as an envelope; anything else is
/// plain text. Returns `None` for a malformed envelope.
pub fn interpret(text: &str) -> Option<Delivery> {
    if !text.trim_start().starts_with('{') {
        return Some(Delivery { content: text.to_string(), id: None });
    }
    parse_envelope(text)
}

/// Strict envelope parse, used for SEND_DATA payloads
pub fn parse_envelope(text: &str) -> Option<Delivery> {
    match MessageEnvelope::from_json(text) {
        Ok(envelope) => Some(Delivery { content: envelope.content, id: Some(envelope.id) }),
        Err(e) => {
            warn!("Dropping malformed envelope ({} chars): {}", text.chars().count(), e);
            None
        }
    }
}

/// Single-slot memory of the last delivered envelope id
#[derive(Debug, Default)]
pub struct DedupFilter {
    last_id: Option<String>,
}

impl DedupFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the delivery repeats the immediately preceding envelope
    pub fn admit(&mut self, delivery: &Delivery) -> bool {
        let Some(id) = &delivery.id else {
            return true;
        };
        if self.last_id.as_deref() == Some(id.as_str()) {
            debug!("Suppressing repeated envelope {}", id);
            return false;
        }
        self.last_id = Some(id.clone());
        true
    }

    pub fn clear(&mut self) {
        self.last_id = None;
    }
}

/// Shorten text for status lines
pub fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut short: String = text.chars().take(limit).collect();
    short.push('…');
    short
}
