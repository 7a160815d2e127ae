use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chunk::PassOutcome;
use crate::protocol::TransferError;
use crate::supervisor::{Role, TransferSupervisor};
use crate::transport::{DirectTransport, TcpTransport, Transport};

/// Keep opening connections until the queued message is delivered or
/// the supervisor gives up. Each connection is one send pass.
pub async fn drive<T, F, Fut>(
    supervisor: &mut TransferSupervisor,
    reconnect_interval: Duration,
    mut connect: F,
) -> Result<PassOutcome, TransferError>
where
    T: Transport,
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut last_error = TransferError::NoSession;
    loop {
        if let Some(e) = supervisor.poll_timers() {
            return Err(e);
        }
        if supervisor.role() != Role::Sending {
            return Err(last_error);
        }

        match connect().await {
            Ok(mut transport) => match supervisor.on_connection(&mut transport).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    debug!("Pass failed: {}", e);
                    last_error = e;
                }
            },
            Err(e) => {
                let e = TransferError::Transport(e.to_string());
                debug!("Connect failed: {}", e);
                supervisor.on_transport_error(e.clone());
                last_error = e;
            }
        }

        tokio::time::sleep(reconnect_interval).await;
    }
}

pub async fn send_to(
    supervisor: &mut TransferSupervisor,
    addr: &str,
    reconnect_interval: Duration,
) -> Result<PassOutcome, TransferError> {
    info!("Sending to target at {}", addr);
    drive(supervisor, reconnect_interval, || TcpTransport::connect(addr)).await
}

/// Deliver the queued message to an in-process target, pausing between
/// failed passes until the supervisor completes or gives up
pub async fn loopback(
    initiator: &mut TransferSupervisor,
    target: &mut TransferSupervisor,
    reconnect_interval: Duration,
) -> Result<PassOutcome, TransferError> {
    let mut last_error = TransferError::NoSession;
    loop {
        if let Some(e) = initiator.poll_timers() {
            return Err(e);
        }
        if initiator.role() != Role::Sending {
            return Err(last_error);
        }

        match initiator.on_connection(&mut DirectTransport::new(&mut *target)).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) => {
                warn!("Loopback pass failed: {}", e);
                last_error = e;
            }
        }

        tokio::time::sleep(reconnect_interval).await;
    }
}

pub async fn fetch_from(supervisor: &mut TransferSupervisor, addr: &str) -> Result<String, TransferError> {
    let mut transport = TcpTransport::connect(addr).await?;
    supervisor.fetch(&mut transport).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::events::EventSink;

    struct Refused;

    #[async_trait::async_trait]
    impl Transport for Refused {
        async fn transceive(&mut self, _frame: &[u8]) -> anyhow::Result<Vec<u8>> {
            anyhow::bail!("unreachable")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_target_gives_up_after_retry_window() {
        let (events, _rx) = EventSink::channel();
        let config = TransferConfig { retry_timeout_ms: 1000, ..Default::default() };
        let mut supervisor = TransferSupervisor::new(config, events);
        supervisor.queue_message("hello").unwrap();

        let mut attempts = 0;
        let result = drive(&mut supervisor, Duration::from_millis(100), || {
            attempts += 1;
            async { anyhow::Result::<Refused>::Err(anyhow::anyhow!("connection refused")) }
        })
        .await;

        assert_eq!(result, Err(TransferError::RetryExpired));
        assert!(attempts >= 10);
        assert_eq!(supervisor.role(), Role::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn loopback_waits_between_passes_until_retry_expires() {
        let config = TransferConfig { retry_timeout_ms: 1000, ..Default::default() };
        let (events, _rx) = EventSink::channel();
        let mut initiator = TransferSupervisor::new(config.clone(), events);
        initiator.queue_message("nobody is listening").unwrap();

        // Idle target answers every frame with UNKNOWN
        let (target_events, _target_rx) = EventSink::channel();
        let mut target = TransferSupervisor::new(config, target_events);

        let start = tokio::time::Instant::now();
        let result = loopback(&mut initiator, &mut target, Duration::from_millis(100)).await;
        assert_eq!(result, Err(TransferError::RetryExpired));
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert_eq!(initiator.role(), Role::Idle);
    }

    #[tokio::test]
    async fn loopback_delivers_to_listening_target() {
        let config = TransferConfig { max_chunk_size: 8, chunk_delay_ms: 0, ..Default::default() };
        let (events, _rx) = EventSink::channel();
        let mut initiator = TransferSupervisor::new(config.clone(), events);
        let id = initiator.queue_message("chunked loopback").unwrap();

        let (target_events, _target_rx) = EventSink::channel();
        let mut target = TransferSupervisor::new(config, target_events);
        target.listen(None);

        let outcome = loopback(&mut initiator, &mut target, Duration::from_millis(100)).await.unwrap();
        assert_eq!(outcome.id, id);
    }
}
