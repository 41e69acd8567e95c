//! Graceful shutdown signal, grounded on the teacher's `main.rs`: a
//! dedicated OS-signal thread (`signal_hook` on Unix, `ctrlc` on Windows)
//! that flips a shared flag, bridged here into a single `Notify` so the
//! fully-async launcher can simply `.await` it instead of polling an
//! `AtomicBool` on a timer.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;

pub struct ShutdownSignal {
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub fn install() -> Result<Self> {
        let notify = Arc::new(Notify::new());
        install_handler(notify.clone())?;
        Ok(Self { notify })
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[cfg(unix)]
fn install_handler(notify: Arc<Notify>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            tracing::info!("received shutdown signal");
            notify.notify_waiters();
        }
    });
    Ok(())
}

#[cfg(windows)]
fn install_handler(notify: Arc<Notify>) -> Result<()> {
    ctrlc::set_handler(move || {
        tracing::info!("received shutdown signal");
        notify.notify_waiters();
    })?;
    Ok(())
}
