//! Per-run cancellation shared by every walker worker and the ingest loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Token for cooperative cancellation of a crawl or ingestion run.
///
/// Clone is cheap and shares state. Workers poll it between entries; the
/// ingest loop polls it between batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new cancellation token (not cancelled).
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Trip this token on SIGINT/SIGTERM (Ctrl+C on windows).
    pub fn cancel_on_signal(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGINT, SIGTERM};
            use signal_hook::iterator::Signals;

            let mut signals = Signals::new([SIGINT, SIGTERM])?;
            let token = self.clone();
            std::thread::spawn(move || {
                if let Some(sig) = signals.forever().next() {
                    info!("Received signal {}, finishing in-flight work...", sig);
                    token.cancel();
                }
            });
        }

        #[cfg(windows)]
        {
            let token = self.clone();
            ctrlc::set_handler(move || {
                info!("Received Ctrl+C, finishing in-flight work...");
                token.cancel();
            })
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        }

        Ok(())
    }
}
