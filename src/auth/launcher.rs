//! Launching the interactive sign-in experience.

use std::sync::mpsc as std_mpsc;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{error, info};
use url::Url;

use crate::auth::callback_server;
use crate::auth::completer::CompletionPayload;
use crate::error::AuthError;

/// Starts the user-facing part of an interactive sign-in.
///
/// The outcome reaches the core later, through
/// [`InteractiveAuthCompleter`](crate::auth::completer::InteractiveAuthCompleter).
pub trait InteractionLauncher: Send + Sync {
    fn launch(&self, authorize_url: &Url) -> Result<(), AuthError>;
}

/// Opens the system browser and listens on the loopback redirect URI.
///
/// The redirect (or cancellation) is forwarded as a [`CompletionPayload`] on
/// the channel given at construction.
pub struct BrowserLauncher {
    completion_tx: mpsc::Sender<CompletionPayload>,
    cancel_tx: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl BrowserLauncher {
    pub fn new(completion_tx: mpsc::Sender<CompletionPayload>) -> Self {
        Self {
            completion_tx,
            cancel_tx: Mutex::new(None),
        }
    }

    /// Stop waiting for the redirect. The listener reports `Cancelled`.
    pub fn cancel(&self) -> bool {
        match self.lock_cancel().take() {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    fn lock_cancel(&self) -> std::sync::MutexGuard<'_, Option<std_mpsc::Sender<()>>> {
        self.cancel_tx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InteractionLauncher for BrowserLauncher {
    fn launch(&self, authorize_url: &Url) -> Result<(), AuthError> {
        let (cancel_tx, cancel_rx) = std_mpsc::channel();
        if let Some(previous) = self.lock_cancel().replace(cancel_tx) {
            let _ = previous.send(());
        }

        let tx = self.completion_tx.clone();
        std::thread::spawn(move || {
            let payload = callback_server::start_callback_server(cancel_rx);
            if tx.blocking_send(payload).is_err() {
                error!("Sign-in completion dropped: receiver closed");
            }
        });

        if let Err(e) = open::that(authorize_url.as_str()) {
            error!("Failed to open browser: {}", e);
            self.cancel();
            return Err(AuthError::LaunchFailed(e.to_string()));
        }

        info!("Browser opened for sign-in");
        Ok(())
    }
}
