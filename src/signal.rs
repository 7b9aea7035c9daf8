use std::io;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Keeps the interrupt listener alive; dropping it restores nothing but stops
/// forwarding signals to the shutdown token.
pub struct SignalGuard {
    listener: JoinHandle<()>,
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Route SIGINT and SIGTERM to `shutdown`.
///
/// The first signal cancels the token; later ones are logged and absorbed so
/// a second Ctrl-C cannot cut the drain short.
pub fn install(shutdown: CancellationToken) -> io::Result<SignalGuard> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let listener = tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                received = interrupt.recv() => match received {
                    Some(()) => "SIGINT",
                    None => break,
                },
                received = terminate.recv() => match received {
                    Some(()) => "SIGTERM",
                    None => break,
                },
            };

            if shutdown.is_cancelled() {
                debug!(signal = name, "Shutdown already in progress; ignoring signal");
            } else {
                info!(signal = name, "Ctrl+C pressed. Stopping all workers...");
                shutdown.cancel();
            }
        }
    });

    Ok(SignalGuard { listener })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{raise, Signal};
    use std::time::Duration;

    #[tokio::test]
    async fn sigterm_cancels_shutdown_token() {
        let shutdown = CancellationToken::new();
        let _guard = install(shutdown.clone()).expect("install handlers");

        raise(Signal::SIGTERM).expect("raise SIGTERM");

        tokio::time::timeout(Duration::from_secs(5), shutdown.cancelled())
            .await
            .expect("token cancelled after SIGTERM");

        // A repeated signal is absorbed rather than killing the test process.
        raise(Signal::SIGTERM).expect("raise SIGTERM again");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(shutdown.is_cancelled());
    }
}
