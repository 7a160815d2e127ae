use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::protocol::link::{read_frame, write_frame};
use crate::protocol::{Command, Response, TransferError};

/// One command/response turn with the target
#[async_trait]
pub trait Transport: Send {
    async fn transceive(&mut self, frame: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// Target side: answers exactly one frame per call
pub trait FrameHandler {
    fn handle_frame(&mut self, frame: &[u8]) -> Vec<u8>;
}

/// Frames over a TCP stream, one link frame each way per turn
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!("Connected to target at {}", addr);
        Ok(Self { stream })
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn transceive(&mut self, frame: &[u8]) -> anyhow::Result<Vec<u8>> {
        write_frame(&mut self.stream, frame).await?;
        read_frame(&mut self.stream).await
    }
}

/// In-process link straight into a frame handler
pub struct DirectTransport<'a> {
    handler: &'a mut (dyn FrameHandler + Send),
}

impl<'a> DirectTransport<'a> {
    pub fn new(handler: &'a mut (dyn FrameHandler + Send)) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<'a> Transport for DirectTransport<'a> {
    async fn transceive(&mut self, frame: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(self.handler.handle_frame(frame))
    }
}

/// Send one command and decode the response, bounded by `timeout`
pub async fn exchange(
    transport: &mut dyn Transport,
    command: &Command,
    timeout: Duration,
) -> Result<Response, TransferError> {
    let frame = command.encode().map_err(TransferError::Encode)?;
    trace!("-> {} ({} bytes)", command.name(), frame.len());

    let raw = match tokio::time::timeout(timeout, transport.transceive(&frame)).await {
        Ok(result) => result?,
        Err(_) => return Err(TransferError::Timeout),
    };

    let response = Response::decode(&raw)
        .map_err(|e| TransferError::Transport(format!("bad response to {}: {}", command.name(), e)))?;
    trace!("<- {:?} ({} payload bytes)", response.status, response.payload.len());
    Ok(response)
}
