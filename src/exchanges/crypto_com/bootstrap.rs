//! Bootstrap requests: state-establishing calls reissued after every login.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use super::gateway::Shared;
use super::message::Response;

pub struct BootstrapEntry {
    pub api_method: String,
    issue: Box<dyn Fn() + Send + Sync>,
    pub initialized: bool,
}

impl BootstrapEntry {
    /// `issue` must be safe to call repeatedly.
    pub fn new(api_method: impl Into<String>, issue: Box<dyn Fn() + Send + Sync>) -> Self {
        BootstrapEntry {
            api_method: api_method.into(),
            issue,
            initialized: false,
        }
    }
}

#[derive(Default)]
pub struct BootstrapTracker {
    entries: Vec<BootstrapEntry>,
    initializing: bool,
    initialized: bool,
}

impl BootstrapTracker {
    pub fn new(entries: Vec<BootstrapEntry>) -> Self {
        BootstrapTracker {
            entries,
            initializing: false,
            initialized: false,
        }
    }

    pub fn on_auth_change(&mut self, authenticated: bool) {
        if authenticated {
            self.initializing = true;
        } else {
            self.initializing = false;
            self.initialized = false;
            for entry in &mut self.entries {
                entry.initialized = false;
            }
        }
    }

    /// Makes the next `issue_pending` reissue whatever is still missing.
    pub fn request_reissue(&mut self) {
        if !self.initialized {
            self.initializing = true;
        }
    }

    /// Issues every uninitialized entry if an issue round is due. Returns the
    /// number of entries issued.
    pub fn issue_pending(&mut self) -> usize {
        if !self.initializing {
            return 0;
        }
        let mut issued = 0;
        for entry in self.entries.iter().filter(|e| !e.initialized) {
            debug!("Issuing bootstrap request {}", entry.api_method);
            (entry.issue)();
            issued += 1;
        }
        self.initializing = false;
        self.refresh();
        issued
    }

    pub fn on_response(&mut self, response: &Response) {
        if !response.is_success() {
            return;
        }
        let mut matched = false;
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.api_method == response.method)
        {
            entry.initialized = true;
            matched = true;
        }
        if matched {
            self.refresh();
        }
    }

    fn refresh(&mut self) {
        let complete = self.entries.iter().all(|e| e.initialized);
        if complete && !self.initialized {
            info!("Bootstrap complete");
        }
        self.initialized = complete;
    }

    pub fn is_complete(&self) -> bool {
        self.initialized
    }

    pub fn pending_methods(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.initialized)
            .map(|e| e.api_method.clone())
            .collect()
    }
}

/// Issues bootstrap rounds when woken by an auth change, and on every retry
/// tick while authenticated.
pub(crate) async fn run_issuer(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shared.bootstrap_wake.notified() => {}
            _ = tokio::time::sleep(shared.config.bootstrap_retry) => {
                if shared.auth.is_authenticated() {
                    shared.bootstrap().request_reissue();
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
        if shared.auth.is_authenticated() {
            let issued = shared.bootstrap().issue_pending();
            if issued > 0 {
                debug!("Issued {} bootstrap requests", issued);
            }
        }
    }
}
