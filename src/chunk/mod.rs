pub mod receiver;
pub mod sender;

pub use receiver::{ChunkOutcome, ChunkReceiver};
pub use sender::{ChunkSender, PassOutcome, SenderState};

/// Split text into slices of at most `chunk_size` characters.
///
/// Boundaries fall between Unicode scalar values, so a multi-byte
/// character is never cut in half. Every slice holds exactly
/// `chunk_size` characters except possibly the last.
pub fn split_chunks(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(chunk_count(text.chars().count(), chunk_size));
    let mut current = String::new();
    let mut len = 0;

    for c in text.chars() {
        current.push(c);
        len += 1;
        if len == chunk_size {
            chunks.push(std::mem::take(&mut current));
            len = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// `ceil(len / chunk_size)`
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_lengths_follow_ceiling_division() {
        let text = "abcdefghijklmnopqrstuvw";
        for size in 1..=30 {
            let chunks = split_chunks(text, size);
            let len = text.chars().count();
            assert_eq!(chunks.len(), chunk_count(len, size));
            let (last, rest) = chunks.split_last().unwrap();
            assert!(rest.iter().all(|c| c.chars().count() == size));
            assert_eq!(last.chars().count(), len - (chunks.len() - 1) * size);
        }
    }

    #[test]
    fn ordered_concatenation_restores_the_text() {
        let envelope = crate::envelope::MessageEnvelope::new("Grüße aus dem Tag 🚀 with ünïcödé").to_json().unwrap();
        for size in [1, 2, 3, 7, 64, 4096] {
            assert_eq!(split_chunks(&envelope, size).concat(), envelope);
        }
    }

    #[test]
    fn multibyte_characters_are_never_split() {
        let chunks = split_chunks("🚀🚀🚀", 2);
        assert_eq!(chunks, vec!["🚀🚀".to_string(), "🚀".to_string()]);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(split_chunks("", 4).is_empty());
        assert_eq!(chunk_count(0, 4), 0);
    }
}
