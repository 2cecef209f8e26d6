//! Waiting for a freshly spawned debug server to accept debugger connections.

use super::runner::ServerProcess;
use crate::error::WorkflowError;
use crate::platform::Readiness;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;

pub(crate) async fn wait_until_ready<S: ServerProcess>(
    server: &mut S,
    readiness: &Readiness,
) -> Result<(), WorkflowError> {
    match readiness {
        Readiness::Delay { delay } => {
            tokio::time::sleep(*delay).await;
            match server.try_exit()? {
                Some(exit) => Err(WorkflowError::ServerExited { exit }),
                None => Ok(()),
            }
        }
        Readiness::Port {
            addr,
            timeout,
            poll_interval,
        } => poll_port(server, *addr, *timeout, *poll_interval).await,
    }
}

async fn poll_port<S: ServerProcess>(
    server: &mut S,
    addr: SocketAddr,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), WorkflowError> {
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;

    loop {
        if let Some(exit) = server.try_exit()? {
            return Err(WorkflowError::ServerExited { exit });
        }

        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let connect_budget = poll_interval.max(Duration::from_millis(10)).min(remaining);
        match tokio::time::timeout(connect_budget, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => {
                tracing::debug!("{} ready on {addr} after {attempts} attempt(s)", server.program());
                return Ok(());
            }
            Ok(Err(e)) => tracing::trace!("{addr} not accepting yet: {e}"),
            Err(_) => tracing::trace!("connect to {addr} timed out"),
        }

        if Instant::now() >= deadline {
            return Err(WorkflowError::ServerNotReady {
                addr: addr.to_string(),
                timeout,
            });
        }
        tokio::time::sleep(poll_interval.min(deadline.saturating_duration_since(Instant::now())))
            .await;
    }
}
