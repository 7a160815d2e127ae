pub mod container;
pub mod file_engine;
pub mod record;

pub use file_engine::{FileEngine, FileOutcome, SelectedFile};
pub use record::{NdefRecord, RecordError};
