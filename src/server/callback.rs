//! Recording-control callback
//!
//! The application is told when a viewer starts and stops receiving the
//! stream, typically to start and stop its own recording. Callbacks run on
//! whichever runtime worker drives the session; redispatch to another event
//! loop if needed.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use crate::session::SessionInfo;
use crate::sync::{read, write};

/// Notifications about streaming clients
///
/// Both methods have empty default implementations. Panics are caught and
/// logged; they never reach the accept loop or a session.
pub trait StreamingCallback: Send + Sync + 'static {
    /// A client received the response header and is about to get parts
    fn on_start(&self, session: &SessionInfo) {
        let _ = session;
    }

    /// A client that was started has stopped streaming
    fn on_stop(&self, session: &SessionInfo) {
        let _ = session;
    }
}

/// Replaceable callback shared by the server and its sessions
#[derive(Default)]
pub(crate) struct CallbackSlot {
    callback: RwLock<Option<Arc<dyn StreamingCallback>>>,
}

impl CallbackSlot {
    pub(crate) fn set(&self, callback: Option<Arc<dyn StreamingCallback>>) {
        *write(&self.callback) = callback;
    }

    pub(crate) fn is_set(&self) -> bool {
        read(&self.callback).is_some()
    }

    pub(crate) fn notify_start(&self, session: &SessionInfo) {
        self.invoke("on_start", session, |cb| cb.on_start(session));
    }

    pub(crate) fn notify_stop(&self, session: &SessionInfo) {
        self.invoke("on_stop", session, |cb| cb.on_stop(session));
    }

    fn invoke<F>(&self, name: &'static str, session: &SessionInfo, f: F)
    where
        F: FnOnce(&dyn StreamingCallback),
    {
        // Clone out so the lock is not held while user code runs
        let callback = read(&self.callback).clone();
        let Some(callback) = callback else {
            return;
        };

        if catch_unwind(AssertUnwindSafe(|| f(callback.as_ref()))).is_err() {
            tracing::error!(
                session_id = %session.id,
                callback = name,
                "Streaming callback panicked"
            );
        }
    }
}
