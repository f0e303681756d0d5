//! The application main loop.

use std::fmt::Display;
use std::future::Future;
use std::ops::ControlFlow;

use tether_network::NetworkLayer;
use tether_sync::SyncServer;

/// Starts `sync` listening, waits for `min_clients`, then runs `step` until
/// it breaks.
///
/// A step that fails is logged and the loop moves on to the next one; the
/// loop never stops on its own. The value `step` breaks with is returned.
pub async fn run_main_loop<N, F, Fut, B, E>(
    sync: &SyncServer<N>,
    min_clients: usize,
    mut step: F,
) -> B
where
    N: NetworkLayer,
    F: FnMut(SyncServer<N>) -> Fut,
    Fut: Future<Output = Result<ControlFlow<B>, E>>,
    E: Display,
{
    sync.listen();
    let clients = sync.wait_for_clients(min_clients).await;
    tracing::info!(clients = clients.len(), "main loop starting");

    let mut round: u64 = 0;
    loop {
        round += 1;
        match step(sync.clone()).await {
            Ok(ControlFlow::Continue(())) => {}
            Ok(ControlFlow::Break(done)) => {
                tracing::info!(round, "main loop finished");
                return done;
            }
            Err(e) => tracing::error!(round, error = %e, "main loop step failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tether_network::{FramedLayer, FramedSocket};
    use tether_sync::SyncConfig;
    use tether_transport::MemoryTransport;

    use super::*;

    #[tokio::test]
    async fn test_run_main_loop_continues_after_errors() {
        let (transport, connector) = MemoryTransport::new();
        let sync = SyncServer::new(FramedLayer::new(transport), SyncConfig::default());
        let _client = FramedSocket::connect(connector.connect().unwrap());

        let rounds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&rounds);
        let done = run_main_loop(&sync, 1, move |server: SyncServer<FramedLayer<MemoryTransport>>| {
            let round = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                assert_eq!(server.client_count(), 1);
                match round {
                    1 | 2 => Err("flaky step"),
                    3 => Ok(ControlFlow::Continue(())),
                    _ => Ok(ControlFlow::Break(round)),
                }
            }
        })
        .await;

        assert_eq!(done, 4);
        assert_eq!(rounds.load(Ordering::SeqCst), 4);
    }
}
