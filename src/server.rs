use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::protocol::link::{read_frame, write_frame};
use crate::supervisor::TransferSupervisor;
use crate::transport::FrameHandler;

/// Interval at which idle sessions are checked while waiting for input
const TIMER_POLL: Duration = Duration::from_millis(500);

/// Serve initiators one connection at a time until the listener fails
pub async fn run_target(supervisor: &mut TransferSupervisor, addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Target listening on {}", listener.local_addr()?);
    serve(supervisor, listener).await
}

pub async fn serve(supervisor: &mut TransferSupervisor, listener: TcpListener) -> anyhow::Result<()> {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = tokio::time::sleep(TIMER_POLL) => {
                supervisor.poll_timers();
                continue;
            }
        };

        match accepted {
            Ok((socket, peer)) => {
                info!("Initiator connected from {}", peer);
                socket.set_nodelay(true)?;
                match serve_connection(supervisor, socket).await {
                    Ok(turns) => info!("Initiator {} left after {} frames", peer, turns),
                    Err(e) => warn!("Link to {} dropped: {}", peer, e),
                }
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Answer frames on one connection until the peer disconnects or stays
/// silent for longer than the transfer timeout
pub async fn serve_connection(supervisor: &mut TransferSupervisor, mut stream: TcpStream) -> anyhow::Result<usize> {
    let idle_limit = supervisor.config().transfer_timeout();
    let mut turns = 0;
    loop {
        // A timed-out read leaves the stream mid-frame, so the link is closed
        let frame = match tokio::time::timeout(idle_limit, read_frame(&mut stream)).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) if is_disconnect(&e) => return Ok(turns),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!("Initiator silent for {:?}, closing link", idle_limit);
                supervisor.poll_timers();
                return Ok(turns);
            }
        };

        supervisor.poll_timers();
        let response = supervisor.handle_frame(&frame);
        write_frame(&mut stream, &response).await?;
        turns += 1;
        debug!("Answered frame {} ({} bytes)", turns, response.len());
    }
}

fn is_disconnect(e: &anyhow::Error) -> bool {
    e.downcast_ref::<std::io::Error>().is_some_and(|io| {
        matches!(
            io.kind(),
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset
        )
    })
}
