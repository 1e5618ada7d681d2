//! Length-prefixed framed connection over a cap.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use strand_bytes::{ByteHub, ByteHubError, BytesPool, HubReader, HubWriter};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::{cap::Cap, error::ConnectionError};

/// Length of the big-endian frame header.
const HEADER_LEN: usize = 4;

/// Upper bound on cap calls per pump invocation. Bounds per-tick syscall
/// cost and cache pressure when a cap keeps accepting small amounts.
const PASS_LIMIT: usize = 5;

/// Configuration for a [`FramedConnection`].
#[derive(Debug, Clone, Copy)]
pub struct FramedConnectionConfig {
    /// Largest frame this side will stage for sending, in payload bytes.
    pub max_send_byte_count: u32,
    /// Largest frame this side will accept, in payload bytes.
    pub max_receive_byte_count: u32,
}

impl FramedConnectionConfig {
    /// Smallest accepted value for either frame limit.
    pub const MIN_FRAME_LIMIT: u32 = 256;
}

impl Default for FramedConnectionConfig {
    fn default() -> Self {
        Self {
            max_send_byte_count: 4 * 1024 * 1024,
            max_receive_byte_count: 4 * 1024 * 1024,
        }
    }
}

struct SendState {
    header: [u8; HEADER_LEN],
    /// Position within the header; -1 means no outbound frame pending.
    header_cursor: i32,
    hub: ByteHub,
}

struct ReceiveState {
    header: [u8; HEADER_LEN],
    header_cursor: usize,
    /// Payload bytes still expected; -1 means awaiting the header.
    content_remaining: i64,
    /// A complete frame is buffered and waiting for its consumer.
    completed: bool,
    hub: ByteHub,
}

/// A framed connection over a [`Cap`].
///
/// Each message travels as `u32_be length || payload`. The connection
/// holds at most one outbound frame and at most one buffered inbound
/// frame; the send and receive mailboxes are binary semaphores (send
/// starts permitted, receive starts unpermitted).
///
/// The connection makes no progress by itself: a
/// [`ConnectionDispatcher`](crate::ConnectionDispatcher) must drive
/// [`pump_send`](Self::pump_send) and
/// [`pump_receive`](Self::pump_receive). A cap failure or an oversized
/// frame closes the connection terminally.
pub struct FramedConnection {
    cap: Box<dyn Cap>,
    config: FramedConnectionConfig,
    send: Mutex<SendState>,
    receive: Mutex<ReceiveState>,
    /// Permitted while no outbound frame is staged.
    send_ready: Semaphore,
    /// Permitted while a complete inbound frame awaits its consumer.
    receive_ready: Semaphore,
    sent_byte_count: AtomicU64,
    received_byte_count: AtomicU64,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FramedConnection {
    /// Create a connection over `cap`, renting frame buffers from `pool`.
    pub fn new(
        cap: Box<dyn Cap>,
        config: FramedConnectionConfig,
        pool: &Arc<BytesPool>,
    ) -> Result<Arc<Self>, ConnectionError> {
        if config.max_send_byte_count < FramedConnectionConfig::MIN_FRAME_LIMIT {
            return Err(ConnectionError::Config { reason: "max_send_byte_count below minimum" });
        }
        if config.max_receive_byte_count < FramedConnectionConfig::MIN_FRAME_LIMIT {
            return Err(ConnectionError::Config {
                reason: "max_receive_byte_count below minimum",
            });
        }

        Ok(Arc::new(Self {
            cap,
            config,
            send: Mutex::new(SendState {
                header: [0; HEADER_LEN],
                header_cursor: -1,
                hub: ByteHub::new(Arc::clone(pool)),
            }),
            receive: Mutex::new(ReceiveState {
                header: [0; HEADER_LEN],
                header_cursor: 0,
                content_remaining: -1,
                completed: false,
                hub: ByteHub::new(Arc::clone(pool)),
            }),
            send_ready: Semaphore::new(1),
            receive_ready: Semaphore::new(0),
            sent_byte_count: AtomicU64::new(0),
            received_byte_count: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }))
    }

    /// Total bytes pushed into the cap, headers included.
    pub fn sent_byte_count(&self) -> u64 {
        self.sent_byte_count.load(Ordering::Acquire)
    }

    /// Total bytes pulled from the cap, headers included.
    pub fn received_byte_count(&self) -> u64 {
        self.received_byte_count.load(Ordering::Acquire)
    }

    /// Whether this connection has terminally closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the connection and tear down the cap under it. Waiters on
    /// either mailbox are woken with [`ConnectionError::Closed`].
    /// Closing twice is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.send_ready.close();
        self.receive_ready.close();
        self.cap.close();
        tracing::debug!("framed connection closed");
    }

    fn ensure_open(&self) -> Result<(), ConnectionError> {
        if self.is_closed() { Err(ConnectionError::Closed) } else { Ok(()) }
    }

    /// Try to stage an outbound frame without waiting.
    ///
    /// Runs `action` against the send hub and records the frame length.
    /// Returns `Ok(false)` when a frame is already pending.
    pub fn try_enqueue<F>(&self, action: F) -> Result<bool, ConnectionError>
    where
        F: FnOnce(&mut HubWriter<'_>) -> Result<(), ByteHubError>,
    {
        self.ensure_open()?;

        match self.send_ready.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(tokio::sync::TryAcquireError::NoPermits) => return Ok(false),
            Err(tokio::sync::TryAcquireError::Closed) => return Err(ConnectionError::Closed),
        }

        self.stage_frame(action)?;
        Ok(true)
    }

    /// Stage an outbound frame, waiting for the previous one to drain.
    ///
    /// Fails with [`ConnectionError::Cancelled`] if `cancel` fires before
    /// the send mailbox is acquired; once acquired the frame is staged.
    pub async fn enqueue<F>(
        &self,
        action: F,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectionError>
    where
        F: FnOnce(&mut HubWriter<'_>) -> Result<(), ByteHubError>,
    {
        let acquired = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ConnectionError::Cancelled),
            permit = self.send_ready.acquire() => permit.map_err(|_| ConnectionError::Closed)?,
        };
        acquired.forget();

        self.stage_frame(action)
    }

    fn stage_frame<F>(&self, action: F) -> Result<(), ConnectionError>
    where
        F: FnOnce(&mut HubWriter<'_>) -> Result<(), ByteHubError>,
    {
        let mut state = lock(&self.send);

        let outcome = action(&mut state.hub.writer());
        if let Err(e) = outcome {
            state.hub.reset();
            self.send_ready.add_permits(1);
            return Err(e.into());
        }

        let length = state.hub.written_bytes();
        if length > u64::from(self.config.max_send_byte_count) {
            state.hub.reset();
            self.send_ready.add_permits(1);
            return Err(ConnectionError::FrameTooLong {
                length,
                limit: self.config.max_send_byte_count,
            });
        }

        state.header = (length as u32).to_be_bytes();
        state.header_cursor = 0;
        tracing::trace!(length, "frame staged for send");
        Ok(())
    }

    /// Try to consume a buffered inbound frame without waiting.
    ///
    /// Runs `action` against the received payload; afterwards the receive
    /// hub is reset and the connection accepts the next frame. Returns
    /// `Ok(false)` when no complete frame is buffered.
    pub fn try_dequeue<F>(&self, action: F) -> Result<bool, ConnectionError>
    where
        F: FnOnce(&mut HubReader<'_>) -> Result<(), ByteHubError>,
    {
        self.ensure_open()?;

        match self.receive_ready.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(tokio::sync::TryAcquireError::NoPermits) => return Ok(false),
            Err(tokio::sync::TryAcquireError::Closed) => return Err(ConnectionError::Closed),
        }

        self.consume_frame(action)?;
        Ok(true)
    }

    /// Consume the next inbound frame, waiting for one to arrive.
    ///
    /// Fails with [`ConnectionError::Cancelled`] if `cancel` fires before
    /// a frame is available.
    pub async fn dequeue<F>(
        &self,
        action: F,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectionError>
    where
        F: FnOnce(&mut HubReader<'_>) -> Result<(), ByteHubError>,
    {
        let acquired = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ConnectionError::Cancelled),
            permit = self.receive_ready.acquire() => permit.map_err(|_| ConnectionError::Closed)?,
        };
        acquired.forget();

        self.consume_frame(action)
    }

    fn consume_frame<F>(&self, action: F) -> Result<(), ConnectionError>
    where
        F: FnOnce(&mut HubReader<'_>) -> Result<(), ByteHubError>,
    {
        let mut state = lock(&self.receive);
        debug_assert!(state.completed, "receive mailbox permitted without a completed frame");

        let outcome = action(&mut state.hub.reader());

        state.hub.reset();
        state.header_cursor = 0;
        state.content_remaining = -1;
        state.completed = false;

        outcome.map_err(Into::into)
    }

    /// Push staged frame bytes into the cap, writing at most `max` bytes.
    ///
    /// Driven by the dispatcher. When the staged frame drains completely
    /// the send mailbox re-opens for the next `enqueue`. Returns the byte
    /// count actually written.
    pub fn pump_send(&self, max: usize) -> Result<usize, ConnectionError> {
        self.ensure_open()?;

        let mut state = lock(&self.send);
        if state.header_cursor < 0 {
            return Ok(0);
        }

        match self.drive_send(&mut state, max) {
            Ok(written) => {
                self.sent_byte_count.fetch_add(written as u64, Ordering::AcqRel);
                Ok(written)
            },
            Err(e) => {
                drop(state);
                self.close();
                Err(e)
            },
        }
    }

    fn drive_send(
        &self,
        state: &mut SendState,
        max: usize,
    ) -> Result<usize, ConnectionError> {
        let mut total = 0usize;

        for _ in 0..PASS_LIMIT {
            if total >= max || !self.cap.can_send() {
                break;
            }
            let budget = max - total;

            // Header first.
            let cursor = state.header_cursor as usize;
            if cursor < HEADER_LEN {
                let want = budget.min(HEADER_LEN - cursor);
                let written = self
                    .cap
                    .send(&state.header[cursor..cursor + want])
                    .map_err(|_| ConnectionError::Closed)?;
                state.header_cursor += written as i32;
                total += written;

                if written < want {
                    break;
                }
                continue;
            }

            // Payload drained: the frame is done; re-arm the mailbox.
            if state.hub.remain_bytes() == 0 {
                state.hub.reset();
                state.header_cursor = -1;
                self.send_ready.add_permits(1);
                tracing::trace!("outbound frame drained");
                break;
            }

            let mut reader = state.hub.reader();
            let (written, want) = {
                let Some(chunk) = reader.sequence().next() else {
                    break;
                };
                let want = chunk.len().min(budget);
                let written = self
                    .cap
                    .send(&chunk[..want])
                    .map_err(|_| ConnectionError::Closed)?;
                (written, want)
            };
            reader.advance(written)?;
            total += written;

            if state.hub.remain_bytes() == 0 {
                state.hub.reset();
                state.header_cursor = -1;
                self.send_ready.add_permits(1);
                tracing::trace!("outbound frame drained");
                break;
            }
            if written < want {
                break;
            }
        }

        Ok(total)
    }

    /// Pull frame bytes from the cap, reading at most `max` bytes.
    ///
    /// Driven by the dispatcher. When a full frame has been reassembled
    /// the receive mailbox opens for `dequeue`; no further bytes are read
    /// until the frame is consumed. Returns the byte count actually read.
    pub fn pump_receive(&self, max: usize) -> Result<usize, ConnectionError> {
        self.ensure_open()?;

        let mut state = lock(&self.receive);
        if state.completed {
            return Ok(0);
        }

        match self.drive_receive(&mut state, max) {
            Ok(read) => {
                self.received_byte_count.fetch_add(read as u64, Ordering::AcqRel);
                Ok(read)
            },
            Err(e) => {
                drop(state);
                self.close();
                Err(e)
            },
        }
    }

    fn drive_receive(
        &self,
        state: &mut ReceiveState,
        max: usize,
    ) -> Result<usize, ConnectionError> {
        let mut total = 0usize;

        for _ in 0..PASS_LIMIT {
            if total >= max || !self.cap.can_receive() {
                break;
            }
            let budget = max - total;

            if state.content_remaining < 0 {
                let cursor = state.header_cursor;
                let want = budget.min(HEADER_LEN - cursor);
                let read = self
                    .cap
                    .receive(&mut state.header[cursor..cursor + want])
                    .map_err(|_| ConnectionError::Closed)?;
                state.header_cursor += read;
                total += read;

                if state.header_cursor == HEADER_LEN {
                    let length = u32::from_be_bytes(state.header);
                    if length > self.config.max_receive_byte_count {
                        return Err(ConnectionError::FrameTooLong {
                            length: u64::from(length),
                            limit: self.config.max_receive_byte_count,
                        });
                    }
                    state.content_remaining = i64::from(length);
                    if length == 0 {
                        Self::complete_frame(state, &self.receive_ready);
                        break;
                    }
                    continue;
                }

                if read < want {
                    break;
                }
                continue;
            }

            let want = budget.min(state.content_remaining as usize);
            let (read, limit) = {
                let mut writer = state.hub.writer();
                let span = writer.get_span(want)?;
                let limit = span.len().min(want);
                let read = self
                    .cap
                    .receive(&mut span[..limit])
                    .map_err(|_| ConnectionError::Closed)?;
                writer.advance(read)?;
                (read, limit)
            };
            state.content_remaining -= read as i64;
            total += read;

            if state.content_remaining == 0 {
                Self::complete_frame(state, &self.receive_ready);
                break;
            }
            if read < limit {
                break;
            }
        }

        Ok(total)
    }

    fn complete_frame(state: &mut ReceiveState, receive_ready: &Semaphore) {
        state.completed = true;
        receive_ready.add_permits(1);
        tracing::trace!(
            length = state.hub.written_bytes(),
            "inbound frame reassembled"
        );
    }
}
