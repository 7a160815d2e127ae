use tracing::{debug, info, warn};

use crate::ndef::container::{locate, wrap_nlen};
use crate::ndef::record::{encode_message, parse_message, NdefRecord};
use crate::protocol::{Application, Command, Response, CC_FILE_ID, NDEF_FILE_CAPACITY, NDEF_FILE_ID};

/// Payload of the data file when nothing is staged
pub const DEFAULT_TEXT: &str = "hcelink ready";
pub const DEFAULT_LANGUAGE: &str = "en";

/// Capability container of the NDEF application (read-only)
pub const CAPABILITY_CONTAINER: [u8; 15] = [
    0x00, 0x0F, // CCLEN
    0x20, // mapping version 2.0
    0x00, 0x3B, // MLe
    0x00, 0x34, // MLc
    0x04, 0x06, // NDEF file control TLV
    0xE1, 0x04, // NDEF file id
    0x10, 0x00, // max NDEF file size
    0x00, // read access
    0x00, // write access
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectedFile {
    None,
    CapabilityContainer,
    Data,
}

#[derive(Debug)]
pub struct FileOutcome {
    pub response: Response,
    /// Text records extracted after an update, in record order
    pub messages: Vec<String>,
}

impl FileOutcome {
    fn reply(response: Response) -> Self {
        Self { response, messages: Vec::new() }
    }
}

/// Offset-addressed file access for tag-reading tools
#[derive(Debug)]
pub struct FileEngine {
    selected: SelectedFile,
    data: Vec<u8>,
    /// High-water mark of bytes written since the last selection
    written_extent: usize,
    length_written: bool,
}

impl Default for FileEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FileEngine {
    pub fn new() -> Self {
        Self {
            selected: SelectedFile::None,
            data: Vec::new(),
            written_extent: 0,
            length_written: false,
        }
    }

    pub fn selected(&self) -> SelectedFile {
        self.selected
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn handle(&mut self, command: Command, staged: Option<&str>) -> FileOutcome {
        match command {
            Command::SelectApplication(Application::Ndef) => {
                debug!("NDEF application selected");
                self.selected = SelectedFile::None;
                FileOutcome::reply(Response::success())
            }
            Command::SelectFile(file_id) => FileOutcome::reply(self.select_file(file_id, staged)),
            Command::ReadBinary { offset, length } => FileOutcome::reply(self.read(offset as usize, length)),
            Command::UpdateBinary { offset, data } => self.update(offset as usize, &data),
            other => {
                debug!("{} is not a file command", other.name());
                FileOutcome::reply(Response::unknown())
            }
        }
    }

    fn select_file(&mut self, file_id: u16, staged: Option<&str>) -> Response {
        match file_id {
            CC_FILE_ID => {
                self.selected = SelectedFile::CapabilityContainer;
                debug!("Capability container selected");
                Response::success()
            }
            NDEF_FILE_ID => {
                self.selected = SelectedFile::Data;
                self.data = default_content(staged);
                self.written_extent = 0;
                self.length_written = false;
                debug!("Data file selected, {} bytes staged", self.data.len());
                Response::success()
            }
            other => {
                warn!("Unknown file id {:04X}", other);
                Response::not_found()
            }
        }
    }

    fn read(&self, offset: usize, length: usize) -> Response {
        let content: &[u8] = match self.selected {
            SelectedFile::CapabilityContainer => &CAPABILITY_CONTAINER,
            SelectedFile::Data => &self.data,
            SelectedFile::None => {
                warn!("Read with no file selected");
                return Response::not_found();
            }
        };

        match content.get(offset..offset + length) {
            Some(bytes) => Response::with_payload(bytes.to_vec()),
            None => {
                warn!("Read {}..{} beyond file extent {}", offset, offset + length, content.len());
                Response::not_found()
            }
        }
    }

    fn update(&mut self, offset: usize, bytes: &[u8]) -> FileOutcome {
        if self.selected != SelectedFile::Data {
            warn!("Update rejected, {:?} is not writable", self.selected);
            return FileOutcome::reply(Response::not_found());
        }

        let end = offset + bytes.len();
        if end > NDEF_FILE_CAPACITY {
            warn!("Update {}..{} exceeds capacity {}", offset, end, NDEF_FILE_CAPACITY);
            return FileOutcome::reply(Response::not_found());
        }

        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(bytes);
        self.written_extent = self.written_extent.max(end);
        if offset < 2 && !bytes.is_empty() {
            self.length_written = true;
        }

        FileOutcome {
            response: Response::success(),
            messages: self.reassemble(),
        }
    }

    fn reassemble(&self) -> Vec<String> {
        if !self.length_written {
            return Vec::new();
        }
        let Some((shape, range)) = locate(&self.data[..self.written_extent]) else {
            return Vec::new();
        };

        let records = match parse_message(&self.data[range]) {
            Ok(records) => records,
            Err(e) => {
                warn!("Dropping unparsable {:?} container: {}", shape, e);
                return Vec::new();
            }
        };

        let mut messages = Vec::new();
        for record in records.iter().filter(|r| r.is_text()) {
            match record.text_content() {
                Ok(text) => messages.push(text),
                Err(e) => warn!("Skipping text record: {}", e),
            }
        }
        info!("Reassembled {:?} container: {} records, {} text", shape, records.len(), messages.len());
        messages
    }
}

fn default_content(staged: Option<&str>) -> Vec<u8> {
    let text = staged.unwrap_or(DEFAULT_TEXT);
    let mut content = wrap_nlen(&encode_message(&[NdefRecord::text(DEFAULT_LANGUAGE, text)]));
    if content.len() > NDEF_FILE_CAPACITY {
        warn!("Staged text exceeds the data file, serving default payload");
        content = wrap_nlen(&encode_message(&[NdefRecord::text(DEFAULT_LANGUAGE, DEFAULT_TEXT)]));
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(file_id: u16) -> FileEngine {
        let mut engine = FileEngine::new();
        engine.handle(Command::SelectApplication(Application::Ndef), None);
        assert!(engine.handle(Command::SelectFile(file_id), None).response.is_success());
        engine
    }

    fn update(engine: &mut FileEngine, offset: u16, data: &[u8]) -> FileOutcome {
        engine.handle(Command::UpdateBinary { offset, data: data.to_vec() }, None)
    }

    #[test]
    fn capability_container_advertises_capacity() {
        let max = u16::from_be_bytes([CAPABILITY_CONTAINER[11], CAPABILITY_CONTAINER[12]]);
        assert_eq!(max as usize, NDEF_FILE_CAPACITY);
        assert_eq!(u16::from_be_bytes([CAPABILITY_CONTAINER[9], CAPABILITY_CONTAINER[10]]), NDEF_FILE_ID);
    }

    #[test]
    fn capability_container_is_read_only() {
        let mut engine = engine_with(CC_FILE_ID);
        let read = engine.handle(Command::ReadBinary { offset: 0, length: 15 }, None);
        assert_eq!(read.response.payload, CAPABILITY_CONTAINER.to_vec());
        assert_eq!(update(&mut engine, 0, &[0xFF]).response, Response::not_found());
    }

    #[test]
    fn update_then_read_returns_written_bytes() {
        let mut engine = engine_with(NDEF_FILE_ID);
        let bytes = [0xDE, 0xAD, 0xBE, 0xEF, 0x01];
        assert!(update(&mut engine, 8, &bytes).response.is_success());
        let read = engine.handle(Command::ReadBinary { offset: 8, length: bytes.len() }, None);
        assert_eq!(read.response, Response::with_payload(bytes.to_vec()));
    }

    #[test]
    fn data_file_defaults_to_staged_text() {
        let mut engine = FileEngine::new();
        engine.handle(Command::SelectFile(NDEF_FILE_ID), Some("hi"));
        let nlen = engine.handle(Command::ReadBinary { offset: 0, length: 2 }, None).response.payload;
        let len = u16::from_be_bytes([nlen[0], nlen[1]]) as usize;
        let body = engine.handle(Command::ReadBinary { offset: 2, length: len }, None).response.payload;
        assert_eq!(parse_message(&body).unwrap()[0].text_content().unwrap(), "hi");
    }

    #[test]
    fn read_past_extent_is_rejected() {
        let mut engine = engine_with(NDEF_FILE_ID);
        let len = engine.data().len();
        let read = engine.handle(Command::ReadBinary { offset: len as u16, length: 1 }, None);
        assert_eq!(read.response, Response::not_found());
    }

    #[test]
    fn update_beyond_capacity_is_rejected() {
        let mut engine = engine_with(NDEF_FILE_ID);
        let offset = (NDEF_FILE_CAPACITY - 1) as u16;
        assert_eq!(update(&mut engine, offset, &[1, 2]).response, Response::not_found());
    }

    #[test]
    fn unknown_file_and_unselected_access_are_rejected() {
        let mut engine = FileEngine::new();
        assert_eq!(engine.handle(Command::SelectFile(0x1234), None).response, Response::not_found());
        assert_eq!(engine.handle(Command::ReadBinary { offset: 0, length: 1 }, None).response, Response::not_found());
    }

    #[test]
    fn nlen_written_last_triggers_delivery_of_all_text_records() {
        let mut engine = engine_with(NDEF_FILE_ID);
        let message = encode_message(&[NdefRecord::text("en", "first"), NdefRecord::text("fr", "second")]);

        assert!(update(&mut engine, 0, &[0x00, 0x00]).messages.is_empty());
        assert!(update(&mut engine, 2, &message).messages.is_empty());
        let outcome = update(&mut engine, 0, &(message.len() as u16).to_be_bytes());
        assert_eq!(outcome.messages, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn nlen_written_first_waits_for_the_full_body() {
        let mut engine = engine_with(NDEF_FILE_ID);
        let message = encode_message(&[NdefRecord::text("en", "split across updates")]);
        let (head, tail) = message.split_at(6);

        assert!(update(&mut engine, 0, &(message.len() as u16).to_be_bytes()).messages.is_empty());
        assert!(update(&mut engine, 2, head).messages.is_empty());
        let outcome = update(&mut engine, 2 + head.len() as u16, tail);
        assert_eq!(outcome.messages, vec!["split across updates".to_string()]);
    }

    #[test]
    fn tlv_container_is_reassembled() {
        let mut engine = engine_with(NDEF_FILE_ID);
        let message = encode_message(&[NdefRecord::text("en", "tlv")]);
        let mut container = vec![0x03, message.len() as u8];
        container.extend_from_slice(&message);
        container.push(0xFE);

        let outcome = update(&mut engine, 0, &container);
        assert_eq!(outcome.messages, vec!["tlv".to_string()]);
    }

    #[test]
    fn garbage_container_is_dropped() {
        let mut engine = engine_with(NDEF_FILE_ID);
        let outcome = update(&mut engine, 0, &[0x00, 0x03, 0xD1, 0x01, 0x09]);
        assert!(outcome.response.is_success());
        assert!(outcome.messages.is_empty());
    }
}
