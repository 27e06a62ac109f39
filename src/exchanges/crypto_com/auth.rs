use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

pub type AuthObserver = Arc<dyn Fn(bool) + Send + Sync>;

/// Authenticated flag plus the observers told about every transition.
#[derive(Default)]
pub struct AuthState {
    authenticated: AtomicBool,
    observers: Mutex<Vec<AuthObserver>>,
}

impl AuthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn register(&self, observer: AuthObserver) {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    /// Stores the flag and, on a transition, calls every observer in
    /// registration order before returning. Returns whether it changed.
    pub fn set(&self, authenticated: bool) -> bool {
        let previous = self.authenticated.swap(authenticated, Ordering::SeqCst);
        if previous == authenticated {
            return false;
        }
        debug!("Authenticated: {} -> {}", previous, authenticated);

        // observers may register further observers
        let observers: Vec<AuthObserver> = self
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for observer in observers {
            observer(authenticated);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observers_see_transitions_only() {
        let state = AuthState::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        state.register(Arc::new(move |value| sink.lock().unwrap().push(value)));

        assert!(!state.set(false));
        assert!(state.set(true));
        assert!(!state.set(true));
        assert!(state.set(false));

        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
        assert!(!state.is_authenticated());
    }

    #[test]
    fn test_observers_run_in_registration_order() {
        let state = AuthState::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            state.register(Arc::new(move |_| order.lock().unwrap().push(n)));
        }
        state.set(true);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
