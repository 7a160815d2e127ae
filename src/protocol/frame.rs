use crate::protocol::constants::*;
use crate::protocol::error::ProtocolError;
use tracing::trace;

/// Two-byte trailer of every response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWord {
    Success,
    Unknown,
    NotFound,
}

impl StatusWord {
    pub fn to_bytes(self) -> [u8; 2] {
        match self {
            StatusWord::Success => SW_SUCCESS,
            StatusWord::Unknown => SW_UNKNOWN,
            StatusWord::NotFound => SW_NOT_FOUND,
        }
    }

    pub fn from_bytes(sw: [u8; 2]) -> Option<Self> {
        match sw {
            SW_SUCCESS => Some(StatusWord::Success),
            SW_UNKNOWN => Some(StatusWord::Unknown),
            SW_NOT_FOUND => Some(StatusWord::NotFound),
            _ => None,
        }
    }
}

/// Applications reachable through a select-by-name frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Application {
    Transfer,
    Ndef,
}

impl Application {
    pub fn aid(self) -> &'static [u8] {
        match self {
            Application::Transfer => &TRANSFER_AID,
            Application::Ndef => &NDEF_AID,
        }
    }

    fn from_aid(aid: &[u8]) -> Option<Self> {
        [Application::Transfer, Application::Ndef]
            .into_iter()
            .find(|app| app.aid() == aid)
    }
}

/// Decoded command frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SelectApplication(Application),
    SelectFile(u16),
    ReadBinary { offset: u16, length: usize },
    UpdateBinary { offset: u16, data: Vec<u8> },
    ChunkInit { total_length: usize, chunk_size: usize, total_chunks: usize },
    ChunkData { index: usize, text: String },
    ChunkAck { index: usize },
    ChunkComplete,
    GetData,
    SendData(String),
}

const KEYWORDS: [&str; 6] = [
    KW_CHUNK_INIT,
    KW_CHUNK_DATA,
    KW_CHUNK_ACK,
    KW_CHUNK_COMPLETE,
    KW_GET_DATA,
    KW_SEND_DATA,
];

impl Command {
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.is_empty() {
            return Err(ProtocolError::Empty);
        }
        trace!("Decoding frame: {}", hex::encode(frame));

        if let Some(app) = decode_selection(frame) {
            return Ok(Command::SelectApplication(app));
        }

        if frame[0] == CLA_ISO && frame.len() >= 4 {
            if let Some(command) = decode_file_command(frame)? {
                return Ok(command);
            }
        }

        decode_text(frame)
    }

    /// Encode for the wire. File frames use short length fields, so reads
    /// are limited to 256 bytes and updates to 255.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let frame = match self {
            Command::SelectApplication(app) => {
                let aid = app.aid();
                let mut buf = Vec::with_capacity(SELECT_BY_NAME_HEADER.len() + aid.len() + 2);
                buf.extend_from_slice(&SELECT_BY_NAME_HEADER);
                buf.push(aid.len() as u8);
                buf.extend_from_slice(aid);
                buf.push(0x00);
                buf
            }
            Command::SelectFile(file_id) => {
                let mut buf = SELECT_FILE_HEADER.to_vec();
                buf.push(0x02);
                buf.extend_from_slice(&file_id.to_be_bytes());
                buf
            }
            Command::ReadBinary { offset, length } => {
                if *length == 0 || *length > MAX_SHORT_LE {
                    return Err(ProtocolError::FieldTooLong { field: "le", len: *length });
                }
                let [hi, lo] = offset.to_be_bytes();
                // Le of zero means 256
                vec![CLA_ISO, INS_READ_BINARY, hi, lo, (*length % 256) as u8]
            }
            Command::UpdateBinary { offset, data } => {
                let lc = u8::try_from(data.len())
                    .map_err(|_| ProtocolError::FieldTooLong { field: "lc", len: data.len() })?;
                let [hi, lo] = offset.to_be_bytes();
                let mut buf = vec![CLA_ISO, INS_UPDATE_BINARY, hi, lo, lc];
                buf.extend_from_slice(data);
                buf
            }
            Command::ChunkInit { total_length, chunk_size, total_chunks } => {
                format!("{}:{}:{}:{}", KW_CHUNK_INIT, total_length, chunk_size, total_chunks).into_bytes()
            }
            Command::ChunkData { index, text } => {
                format!("{}:{}:{}", KW_CHUNK_DATA, index, text).into_bytes()
            }
            Command::ChunkAck { index } => format!("{}:{}", KW_CHUNK_ACK, index).into_bytes(),
            Command::ChunkComplete => KW_CHUNK_COMPLETE.as_bytes().to_vec(),
            Command::GetData => KW_GET_DATA.as_bytes().to_vec(),
            Command::SendData(json) => format!("{}:{}", KW_SEND_DATA, json).into_bytes(),
        };
        Ok(frame)
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::SelectApplication(_) => "SELECT_APPLICATION",
            Command::SelectFile(_) => "SELECT_FILE",
            Command::ReadBinary { .. } => "READ_BINARY",
            Command::UpdateBinary { .. } => "UPDATE_BINARY",
            Command::ChunkInit { .. } => KW_CHUNK_INIT,
            Command::ChunkData { .. } => KW_CHUNK_DATA,
            Command::ChunkAck { .. } => KW_CHUNK_ACK,
            Command::ChunkComplete => KW_CHUNK_COMPLETE,
            Command::GetData => KW_GET_DATA,
            Command::SendData(_) => KW_SEND_DATA,
        }
    }
}

/// `00 A4 04 00 <Lc> <aid> [Le]` for a registered application only
fn decode_selection(frame: &[u8]) -> Option<Application> {
    if frame.len() < SELECT_BY_NAME_HEADER.len() + 1 || frame[..4] != SELECT_BY_NAME_HEADER {
        return None;
    }
    let lc = frame[4] as usize;
    let body = &frame[5..];
    if body.len() != lc && body.len() != lc + 1 {
        return None;
    }
    Application::from_aid(&body[..lc])
}

fn decode_file_command(frame: &[u8]) -> Result<Option<Command>, ProtocolError> {
    let offset = u16::from_be_bytes([frame[2], frame[3]]);

    if frame[..4] == SELECT_FILE_HEADER {
        if frame.len() < 7 || frame[4] != 0x02 {
            return Err(ProtocolError::Truncated);
        }
        return Ok(Some(Command::SelectFile(u16::from_be_bytes([frame[5], frame[6]]))));
    }

    match frame[1] {
        INS_READ_BINARY => {
            // Short Le of zero means 256
            let length = match frame.get(4) {
                Some(0) | None => 256,
                Some(&le) => le as usize,
            };
            Ok(Some(Command::ReadBinary { offset, length }))
        }
        INS_UPDATE_BINARY => {
            let lc = *frame.get(4).ok_or(ProtocolError::Truncated)? as usize;
            let data = frame.get(5..5 + lc).ok_or(ProtocolError::Truncated)?;
            Ok(Some(Command::UpdateBinary { offset, data: data.to_vec() }))
        }
        _ => Ok(None),
    }
}

fn decode_text(frame: &[u8]) -> Result<Command, ProtocolError> {
    let text = std::str::from_utf8(frame).map_err(|_| ProtocolError::InvalidUtf8)?;
    let keyword = KEYWORDS
        .iter()
        .find(|kw| text.starts_with(**kw))
        .ok_or(ProtocolError::UnknownCommand)?;
    let rest = &text[keyword.len()..];

    match *keyword {
        KW_CHUNK_INIT => {
            let mut fields = fields_of(rest)?.splitn(3, FIELD_SEPARATOR);
            let total_length = parse_number(fields.next(), "total_length")?;
            let chunk_size = parse_number(fields.next(), "chunk_size")?;
            let total_chunks = parse_number(fields.next(), "total_chunks")?;
            Ok(Command::ChunkInit { total_length, chunk_size, total_chunks })
        }
        KW_CHUNK_DATA => {
            let mut fields = fields_of(rest)?.splitn(2, FIELD_SEPARATOR);
            let index = parse_number(fields.next(), "index")?;
            let text = fields.next().ok_or(ProtocolError::MalformedField("text"))?;
            Ok(Command::ChunkData { index, text: text.to_string() })
        }
        KW_CHUNK_ACK => {
            let index = parse_number(Some(fields_of(rest)?), "index")?;
            Ok(Command::ChunkAck { index })
        }
        KW_CHUNK_COMPLETE if rest.is_empty() => Ok(Command::ChunkComplete),
        KW_GET_DATA if rest.is_empty() => Ok(Command::GetData),
        KW_SEND_DATA => Ok(Command::SendData(fields_of(rest)?.to_string())),
        _ => Err(ProtocolError::UnknownCommand),
    }
}

fn fields_of(rest: &str) -> Result<&str, ProtocolError> {
    rest.strip_prefix(FIELD_SEPARATOR)
        .ok_or(ProtocolError::MalformedField("separator"))
}

fn parse_number(field: Option<&str>, name: &'static str) -> Result<usize, ProtocolError> {
    field
        .and_then(|f| f.parse::<usize>().ok())
        .ok_or(ProtocolError::MalformedField(name))
}

/// Response frame: optional payload followed by the status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub payload: Vec<u8>,
    pub status: StatusWord,
}

impl Response {
    pub fn success() -> Self {
        Self { payload: Vec::new(), status: StatusWord::Success }
    }

    pub fn unknown() -> Self {
        Self { payload: Vec::new(), status: StatusWord::Unknown }
    }

    pub fn not_found() -> Self {
        Self { payload: Vec::new(), status: StatusWord::NotFound }
    }

    pub fn with_payload(payload: Vec<u8>) -> Self {
        Self { payload, status: StatusWord::Success }
    }

    pub fn ack(index: usize) -> Self {
        Self::with_payload(format!("{}:{}", KW_CHUNK_ACK, index).into_bytes())
    }

    pub fn is_success(&self) -> bool {
        self.status == StatusWord::Success
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload.len() + 2);
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.status.to_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < 2 {
            return Err(ProtocolError::Truncated);
        }
        let (payload, trailer) = bytes.split_at(bytes.len() - 2);
        let sw = [trailer[0], trailer[1]];
        let status = StatusWord::from_bytes(sw).ok_or(ProtocolError::UnexpectedStatus(sw))?;
        Ok(Self { payload: payload.to_vec(), status })
    }

    /// Index carried by a `CHUNK_ACK:<index>` payload
    pub fn ack_index(&self) -> Option<usize> {
        if !self.is_success() {
            return None;
        }
        match Command::decode(&self.payload) {
            Ok(Command::ChunkAck { index }) => Some(index),
            _ => None,
        }
    }
}
