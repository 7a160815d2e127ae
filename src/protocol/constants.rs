//! Protocol constants for the hcelink command/response exchange

/// Fixed header of a select-by-name frame: CLA, INS, P1, P2
pub const SELECT_BY_NAME_HEADER: [u8; 4] = [0x00, 0xA4, 0x04, 0x00];

/// Fixed header of a select-by-file-id frame
pub const SELECT_FILE_HEADER: [u8; 4] = [0x00, 0xA4, 0x00, 0x0C];

/// Application identifier registered for the transfer protocol
pub const TRANSFER_AID: [u8; 7] = [0xF0, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06];

/// Application identifier of the NDEF tag application
pub const NDEF_AID: [u8; 7] = [0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];

/// Instruction bytes
pub const CLA_ISO: u8 = 0x00;
pub const INS_SELECT: u8 = 0xA4;
pub const INS_READ_BINARY: u8 = 0xB0;
pub const INS_UPDATE_BINARY: u8 = 0xD6;

/// Largest read a short Le field can request
pub const MAX_SHORT_LE: usize = 256;

/// Status words
pub const SW_SUCCESS: [u8; 2] = [0x90, 0x00];
pub const SW_UNKNOWN: [u8; 2] = [0x00, 0x00];
pub const SW_NOT_FOUND: [u8; 2] = [0x6A, 0x82];

/// Text command keywords, in match order
pub const KW_CHUNK_INIT: &str = "CHUNK_INIT";
pub const KW_CHUNK_DATA: &str = "CHUNK_DATA";
pub const KW_CHUNK_ACK: &str = "CHUNK_ACK";
pub const KW_CHUNK_COMPLETE: &str = "CHUNK_COMPLETE";
pub const KW_GET_DATA: &str = "GET_DATA";
pub const KW_SEND_DATA: &str = "SEND_DATA";

pub const FIELD_SEPARATOR: char = ':';

/// File identifiers of the NDEF application
pub const CC_FILE_ID: u16 = 0xE103;
pub const NDEF_FILE_ID: u16 = 0xE104;

/// Capacity of the NDEF data file, including the 2-byte length prefix
pub const NDEF_FILE_CAPACITY: usize = 4096;
