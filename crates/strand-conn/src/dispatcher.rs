//! Cooperative pump shared by a set of framed connections.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use crate::connection::FramedConnection;

/// Configuration for a [`ConnectionDispatcher`].
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Byte budget per second for the send direction, shared across all
    /// registered connections.
    pub max_send_bytes_per_second: usize,
    /// Byte budget per second for the receive direction.
    pub max_receive_bytes_per_second: usize,
    /// Pump cadence. The per-tick slice is `budget / ticks_per_second`.
    pub ticks_per_second: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_send_bytes_per_second: 1024 * 1024,
            max_receive_bytes_per_second: 1024 * 1024,
            ticks_per_second: 30,
        }
    }
}

/// Time-sliced pump driving every registered connection.
///
/// The dispatcher owns one background task that wakes at the configured
/// cadence, computes the per-tick byte slices, and calls
/// [`FramedConnection::pump_send`] and
/// [`FramedConnection::pump_receive`] on each live connection. Budget a
/// connection leaves unused stays available within the current second
/// and resets at each new second.
///
/// Connections are held weakly: dropping the last strong reference, or a
/// terminal connection error, unregisters them on the next tick. The
/// iteration start rotates every tick so no connection is persistently
/// favored.
///
/// Dropping the dispatcher stops the pump task.
pub struct ConnectionDispatcher {
    inner: Arc<DispatcherInner>,
    abort: tokio::task::AbortHandle,
}

struct DispatcherInner {
    connections: Mutex<Vec<Weak<FramedConnection>>>,
    config: DispatcherConfig,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionDispatcher {
    /// Start a dispatcher and its pump task.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(config: DispatcherConfig) -> Self {
        let inner = Arc::new(DispatcherInner {
            connections: Mutex::new(Vec::new()),
            config,
        });

        let pump_inner = Arc::clone(&inner);
        let task = tokio::spawn(run_pump(pump_inner));

        Self { inner, abort: task.abort_handle() }
    }

    /// Register a connection for pumping.
    ///
    /// The dispatcher keeps only a weak reference; the connection stays
    /// registered until it is dropped or closes.
    pub fn register(&self, connection: &Arc<FramedConnection>) {
        lock(&self.inner.connections).push(Arc::downgrade(connection));
        tracing::debug!("connection registered with dispatcher");
    }

    /// Number of currently live registered connections.
    pub fn registered_count(&self) -> usize {
        lock(&self.inner.connections)
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Stop the pump task. Registered connections are left untouched.
    pub fn stop(&self) {
        self.abort.abort();
    }
}

impl Drop for ConnectionDispatcher {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

async fn run_pump(inner: Arc<DispatcherInner>) {
    let ticks_per_second = inner.config.ticks_per_second.max(1);
    let period = Duration::from_secs(1) / ticks_per_second;
    let send_slice = inner.config.max_send_bytes_per_second / ticks_per_second as usize;
    let receive_slice = inner.config.max_receive_bytes_per_second / ticks_per_second as usize;

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut tick_in_second = 0u32;
    let mut send_available = 0usize;
    let mut receive_available = 0usize;
    let mut rotation = 0usize;

    loop {
        interval.tick().await;

        // Unused budget carries over within the second only.
        if tick_in_second == 0 {
            send_available = 0;
            receive_available = 0;
        }
        send_available += send_slice;
        receive_available += receive_slice;
        tick_in_second = (tick_in_second + 1) % ticks_per_second;

        let live: Vec<Arc<FramedConnection>> = {
            let mut connections = lock(&inner.connections);
            let before = connections.len();
            connections.retain(|weak| {
                weak.upgrade().is_some_and(|connection| !connection.is_closed())
            });
            if connections.len() < before {
                tracing::debug!(
                    dropped = before - connections.len(),
                    "dispatcher pruned dead connections"
                );
            }
            connections.iter().filter_map(Weak::upgrade).collect()
        };

        if live.is_empty() {
            continue;
        }

        // Rotate the starting connection each tick for long-run fairness.
        rotation = rotation.wrapping_add(1);
        let start = rotation % live.len();

        for offset in 0..live.len() {
            let connection = &live[(start + offset) % live.len()];

            if send_available > 0 {
                if let Ok(written) = connection.pump_send(send_available) {
                    send_available -= written;
                }
            }
            if receive_available > 0 {
                if let Ok(read) = connection.pump_receive(receive_available) {
                    receive_available -= read;
                }
            }
        }
    }
}
