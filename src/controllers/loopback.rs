// controllers/loopback.rs
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::Controller;
use crate::{error::ControllerError, methods::Methods, protocols::Signal};

/// In-memory transceiver. Keeps every frame it is asked to send.
pub struct Loopback {
    id: i32,
    priority: i32,
    methods: Methods,
    latency: Duration,
    failing: AtomicBool,
    sent: Mutex<Vec<Signal>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Loopback {
    pub fn new(id: i32, priority: i32) -> Self {
        Self {
            id,
            priority,
            methods: Methods::all(),
            latency: Duration::ZERO,
            failing: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_methods(mut self, methods: Methods) -> Self {
        self.methods = methods;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes subsequent sends fail as if the transceiver were unplugged.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<Signal> {
        self.sent.lock().await.clone()
    }

    /// Highest number of sends that overlapped in time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Controller for Loopback {
    fn id(&self) -> i32 {
        self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn supported_methods(&self) -> Methods {
        self.methods
    }

    async fn send(&self, signal: &Signal) -> Result<(), ControllerError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(ControllerError::Unavailable(self.id))
        } else {
            debug!(controller = self.id, %signal, "Loopback transmit");
            self.sent.lock().await.push(signal.clone());
            Ok(())
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
