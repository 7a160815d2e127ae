//! NDEF record walking and construction

use std::fmt;

const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;

pub const TNF_WELL_KNOWN: u8 = 0x01;
pub const RTD_TEXT: &[u8] = b"T";

const TEXT_UTF16: u8 = 0x80;
const TEXT_LANG_MASK: u8 = 0x3F;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    Truncated,
    ChunkedRecord,
    InvalidText,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::Truncated => write!(f, "truncated NDEF record"),
            RecordError::ChunkedRecord => write!(f, "chunked NDEF records are not supported"),
            RecordError::InvalidText => write!(f, "text record payload is not valid text"),
        }
    }
}

impl std::error::Error for RecordError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    pub tnf: u8,
    pub record_type: Vec<u8>,
    pub id: Vec<u8>,
    pub payload: Vec<u8>,
}

impl NdefRecord {
    /// Well-known text record with a language code prefix
    pub fn text(language: &str, text: &str) -> Self {
        let lang = &language.as_bytes()[..language.len().min(TEXT_LANG_MASK as usize)];
        let mut payload = Vec::with_capacity(1 + lang.len() + text.len());
        payload.push(lang.len() as u8);
        payload.extend_from_slice(lang);
        payload.extend_from_slice(text.as_bytes());
        Self {
            tnf: TNF_WELL_KNOWN,
            record_type: RTD_TEXT.to_vec(),
            id: Vec::new(),
            payload,
        }
    }

    pub fn is_text(&self) -> bool {
        self.tnf == TNF_WELL_KNOWN && self.record_type == RTD_TEXT
    }

    /// Text of a text record with the language code stripped
    pub fn text_content(&self) -> Result<String, RecordError> {
        let (&status, rest) = self.payload.split_first().ok_or(RecordError::Truncated)?;
        let lang_len = (status & TEXT_LANG_MASK) as usize;
        let body = rest.get(lang_len..).ok_or(RecordError::Truncated)?;

        if status & TEXT_UTF16 != 0 {
            if body.len() % 2 != 0 {
                return Err(RecordError::InvalidText);
            }
            let units = body.chunks_exact(2).map(|p| u16::from_be_bytes([p[0], p[1]]));
            char::decode_utf16(units)
                .collect::<Result<String, _>>()
                .map_err(|_| RecordError::InvalidText)
        } else {
            String::from_utf8(body.to_vec()).map_err(|_| RecordError::InvalidText)
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>, first: bool, last: bool) {
        let short = self.payload.len() <= u8::MAX as usize;
        let mut header = self.tnf & TNF_MASK;
        if first {
            header |= FLAG_MB;
        }
        if last {
            header |= FLAG_ME;
        }
        if short {
            header |= FLAG_SR;
        }
        if !self.id.is_empty() {
            header |= FLAG_IL;
        }

        out.push(header);
        out.push(self.record_type.len() as u8);
        if short {
            out.push(self.payload.len() as u8);
        } else {
            out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        }
        if !self.id.is_empty() {
            out.push(self.id.len() as u8);
        }
        out.extend_from_slice(&self.record_type);
        out.extend_from_slice(&self.id);
        out.extend_from_slice(&self.payload);
    }
}

pub fn encode_message(records: &[NdefRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    let last = records.len().saturating_sub(1);
    for (i, record) in records.iter().enumerate() {
        record.encode_into(&mut out, i == 0, i == last);
    }
    out
}

/// Walk `(header, type_length, payload_length, [id_length], type, [id], payload)` records
pub fn parse_message(bytes: &[u8]) -> Result<Vec<NdefRecord>, RecordError> {
    let mut records = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let header = bytes[pos];
        if header & FLAG_CF != 0 {
            return Err(RecordError::ChunkedRecord);
        }
        pos += 1;

        let type_len = *bytes.get(pos).ok_or(RecordError::Truncated)? as usize;
        pos += 1;

        let payload_len = if header & FLAG_SR != 0 {
            let len = *bytes.get(pos).ok_or(RecordError::Truncated)? as usize;
            pos += 1;
            len
        } else {
            let raw = bytes.get(pos..pos + 4).ok_or(RecordError::Truncated)?;
            pos += 4;
            u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize
        };

        let id_len = if header & FLAG_IL != 0 {
            let len = *bytes.get(pos).ok_or(RecordError::Truncated)? as usize;
            pos += 1;
            len
        } else {
            0
        };

        let record_type = take(bytes, &mut pos, type_len)?;
        let id = take(bytes, &mut pos, id_len)?;
        let payload = take(bytes, &mut pos, payload_len)?;

        records.push(NdefRecord {
            tnf: header & TNF_MASK,
            record_type,
            id,
            payload,
        });

        if header & FLAG_ME != 0 {
            break;
        }
    }

    Ok(records)
}

fn take(bytes: &[u8], pos: &mut usize, len: usize) -> Result<Vec<u8>, RecordError> {
    let end = pos.checked_add(len).ok_or(RecordError::Truncated)?;
    let slice = bytes.get(*pos..end).ok_or(RecordError::Truncated)?;
    *pos = end;
    Ok(slice.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_record_wire_layout() {
        let bytes = encode_message(&[NdefRecord::text("en", "hi")]);
        assert_eq!(bytes, vec![0xD1, 0x01, 0x05, b'T', 0x02, b'e', b'n', b'h', b'i']);
    }

    #[test]
    fn walks_multiple_records_in_order() {
        let uri = NdefRecord { tnf: TNF_WELL_KNOWN, record_type: b"U".to_vec(), id: vec![0x01], payload: vec![0x04, b'x'] };
        let bytes = encode_message(&[NdefRecord::text("en", "one"), uri.clone(), NdefRecord::text("de", "zwei")]);

        let records = parse_message(&bytes).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].text_content().unwrap(), "one");
        assert_eq!(records[1], uri);
        assert!(!records[1].is_text());
        assert_eq!(records[2].text_content().unwrap(), "zwei");
    }

    #[test]
    fn long_payload_uses_four_byte_length() {
        let text = "x".repeat(300);
        let bytes = encode_message(&[NdefRecord::text("en", &text)]);
        assert_eq!(bytes[0] & FLAG_SR, 0);
        assert_eq!(parse_message(&bytes).unwrap()[0].text_content().unwrap(), text);
    }

    #[test]
    fn utf16_text_is_decoded() {
        let mut payload = vec![TEXT_UTF16 | 0x02, b'e', b'n'];
        for unit in "hé".encode_utf16() {
            payload.extend_from_slice(&unit.to_be_bytes());
        }
        let record = NdefRecord { tnf: TNF_WELL_KNOWN, record_type: RTD_TEXT.to_vec(), id: vec![], payload };
        assert_eq!(record.text_content().unwrap(), "hé");
    }

    #[test]
    fn truncated_message_is_an_error() {
        let bytes = encode_message(&[NdefRecord::text("en", "hello")]);
        assert_eq!(parse_message(&bytes[..bytes.len() - 2]), Err(RecordError::Truncated));
    }

    #[test]
    fn chunked_records_are_refused() {
        assert_eq!(parse_message(&[0xB1, 0x01, 0x00, b'T']), Err(RecordError::ChunkedRecord));
    }
}
