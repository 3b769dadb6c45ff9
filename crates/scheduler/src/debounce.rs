//! Trailing-edge debouncer
//!
//! Each [`Debouncer::call`] replaces the pending action and pushes the
//! deadline out by the debounce delay. The action runs on the debouncer's
//! own thread once calls stop arriving.

use log::error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Action = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct PendingAction {
    action: Option<(Instant, Action)>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<PendingAction>,
    wake: Condvar,
}

pub struct Debouncer {
    shared: Arc<Shared>,
    delay: Duration,
    thread: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(name: &str, delay: Duration) -> Self {
        let shared = Arc::new(Shared { state: Mutex::new(PendingAction::default()), wake: Condvar::new() });

        let worker = shared.clone();
        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || Self::run(worker))
            .expect("Failed to spawn debounce thread");

        Self { shared, delay, thread: Some(thread) }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `action`, replacing anything still pending.
    pub fn call(&self, action: impl FnOnce() + Send + 'static) {
        let mut state = self.shared.state.lock().unwrap();
        state.action = Some((Instant::now() + self.delay, Box::new(action)));
        drop(state);
        self.shared.wake.notify_one();
    }

    /// Drop the pending action. Returns `true` if one was pending.
    pub fn cancel(&self) -> bool {
        self.shared.state.lock().unwrap().action.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().unwrap().action.is_some()
    }

    fn run(shared: Arc<Shared>) {
        let mut state = shared.state.lock().unwrap();
        loop {
            if state.shutdown {
                return;
            }

            let deadline = match state.action.as_ref() {
                Some((deadline, _)) => *deadline,
                None => {
                    state = shared.wake.wait(state).unwrap();
                    continue;
                }
            };

            let now = Instant::now();
            if now < deadline {
                state = shared.wake.wait_timeout(state, deadline - now).unwrap().0;
                continue;
            }

            if let Some((_, action)) = state.action.take() {
                drop(state);
                if panic::catch_unwind(AssertUnwindSafe(action)).is_err() {
                    error!("debounced action panicked");
                }
                state = shared.state.lock().unwrap();
            }
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            state.action = None;
        }
        self.shared.wake.notify_all();

        if let Some(thread) = self.thread.take() {
            // The last handle may be dropped from inside a debounced action.
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}
