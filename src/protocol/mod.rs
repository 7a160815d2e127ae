pub mod constants;
pub mod error;
pub mod frame;
pub mod link;

pub use constants::*;
pub use error::{ProtocolError, TransferError};
pub use frame::{Application, Command, Response, StatusWord};
