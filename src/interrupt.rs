use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use log::debug;

use crate::error::PkgsizerError;
use crate::exit_codes::ExitCode;

/// Cooperative cancellation flag shared by directory walks and network workers.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Fail with [`PkgsizerError::Interrupted`] once the flag is set.
    pub fn check(&self) -> Result<(), PkgsizerError> {
        if self.is_triggered() {
            Err(PkgsizerError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Listen for Ctrl-C on a background thread. The first signal sets the flag so work can
    /// unwind; a second one exits immediately.
    pub fn listen_for_ctrl_c(&self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start the signal listener")?;
        let interrupt = self.clone();

        thread::Builder::new()
            .name("ctrl-c".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let mut received = 0;
                    while tokio::signal::ctrl_c().await.is_ok() {
                        received += 1;
                        if received > 1 {
                            ExitCode::KilledBySigint.exit();
                        }
                        debug!("Ctrl-C received, stopping");
                        interrupt.trigger();
                    }
                });
            })
            .context("Failed to spawn the signal listener")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_is_shared_between_clones() {
        let interrupt = Interrupt::new();
        let worker = interrupt.clone();
        assert!(worker.check().is_ok());

        interrupt.trigger();
        assert!(worker.is_triggered());
        assert!(matches!(worker.check(), Err(PkgsizerError::Interrupted)));
    }
}
