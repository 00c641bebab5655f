//! In-process ring backend
//!
//! Behaves like a driver ring: bounded outbound capacity in bytes, a
//! readiness signal for inbound packets, end-of-stream after `end()`.
//! Tests and benchmarks drive the "OS side" through `MemoryRing`. The
//! session holds its adapter until `end()`, like the OS backends do.

use super::{Adapter, RingError, RingSession};
use bytes::Bytes;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct Queues {
    inbound: VecDeque<Bytes>,
    outbound: VecDeque<Bytes>,
    outbound_bytes: usize,
}

/// Shared packet queues between the device and the test harness
#[derive(Default)]
pub struct MemoryRing {
    queues: Mutex<Queues>,
    readable: Condvar,
    capacity: AtomicUsize,
    ended: AtomicBool,
    corrupt: AtomicBool,
    released: AtomicBool,
    operations: AtomicUsize,
    ends: AtomicUsize,
}

impl MemoryRing {
    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a packet for the device to read
    pub fn inject(&self, packet: impl Into<Bytes>) {
        self.lock().inbound.push_back(packet.into());
        self.readable.notify_one();
    }

    /// Drain packets the device has written
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        let mut queues = self.lock();
        queues.outbound_bytes = 0;
        queues.outbound.drain(..).map(|p| p.to_vec()).collect()
    }

    pub fn mark_corrupt(&self) {
        self.corrupt.store(true, Ordering::Release);
    }

    /// End the session from the OS side
    pub fn end(&self) {
        self.ends.fetch_add(1, Ordering::AcqRel);
        self.ended.store(true, Ordering::Release);
        // Take the lock so a waiter between its check and its wait sees this.
        let _queues = self.lock();
        self.readable.notify_all();
    }

    /// receive/send calls seen so far
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::Acquire)
    }

    pub fn end_count(&self) -> usize {
        self.ends.load(Ordering::Acquire)
    }

    pub fn adapter_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

/// Adapter handle over a `MemoryRing`
pub struct MemoryAdapter {
    luid: u64,
    ring: Arc<MemoryRing>,
    capacity: Option<usize>,
    fail_session: bool,
}

impl MemoryAdapter {
    pub fn new(luid: u64) -> Self {
        Self {
            luid,
            ring: Arc::new(MemoryRing::default()),
            capacity: None,
            fail_session: false,
        }
    }

    /// Override the outbound capacity requested by the device
    pub fn with_capacity(mut self, bytes: usize) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Make `start_session` fail
    pub fn failing_session(mut self) -> Self {
        self.fail_session = true;
        self
    }

    pub fn ring(&self) -> Arc<MemoryRing> {
        Arc::clone(&self.ring)
    }
}

impl Adapter for MemoryAdapter {
    type Session = MemorySession;

    fn start_session(self, capacity: u32) -> io::Result<MemorySession> {
        if self.fail_session {
            return Err(io::Error::other("session start refused"));
        }
        let capacity = self.capacity.unwrap_or(capacity as usize);
        self.ring.capacity.store(capacity, Ordering::Release);
        Ok(MemorySession {
            ring: Arc::clone(&self.ring),
            adapter: Mutex::new(Some(self)),
        })
    }

    fn luid(&self) -> u64 {
        self.luid
    }
}

impl Drop for MemoryAdapter {
    fn drop(&mut self) {
        self.ring.released.store(true, Ordering::Release);
    }
}

pub struct MemorySession {
    ring: Arc<MemoryRing>,
    adapter: Mutex<Option<MemoryAdapter>>,
}

impl RingSession for MemorySession {
    fn receive(&self, buf: &mut [u8]) -> Result<usize, RingError> {
        let ring = &self.ring;
        ring.operations.fetch_add(1, Ordering::AcqRel);
        if ring.corrupt.load(Ordering::Acquire) {
            return Err(RingError::Corrupt);
        }
        if ring.ended.load(Ordering::Acquire) {
            return Err(RingError::EndOfStream);
        }

        let packet = ring.lock().inbound.pop_front().ok_or(RingError::Empty)?;
        if packet.len() > buf.len() {
            log::warn!(
                "Truncating {} byte packet to {} byte buffer",
                packet.len(),
                buf.len()
            );
        }
        let n = packet.len().min(buf.len());
        buf[..n].copy_from_slice(&packet[..n]);
        Ok(n)
    }

    fn wait_readable(&self, timeout: Duration) {
        let ring = &self.ring;
        let queues = ring.lock();
        if !queues.inbound.is_empty() || ring.ended.load(Ordering::Acquire) {
            return;
        }
        let _ = ring
            .readable
            .wait_timeout(queues, timeout)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
    }

    fn send(&self, packet: &[u8]) -> Result<usize, RingError> {
        let ring = &self.ring;
        ring.operations.fetch_add(1, Ordering::AcqRel);
        if ring.ended.load(Ordering::Acquire) {
            return Err(RingError::EndOfStream);
        }

        let capacity = ring.capacity.load(Ordering::Acquire);
        let mut queues = ring.lock();
        if queues.outbound_bytes + packet.len() > capacity {
            return Err(RingError::Overflow);
        }
        queues.outbound_bytes += packet.len();
        queues.outbound.push_back(Bytes::copy_from_slice(packet));
        Ok(packet.len())
    }

    fn end(&self) {
        self.ring.end();
        let adapter = self
            .adapter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(adapter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_receive_in_order() {
        let adapter = MemoryAdapter::new(1);
        let ring = adapter.ring();
        let session = adapter.start_session(1024).unwrap();
        ring.inject(b"one".to_vec());
        ring.inject(b"two".to_vec());

        let mut buf = [0u8; 8];
        assert_eq!(session.receive(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"one");
        assert_eq!(session.receive(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"two");
        assert!(matches!(session.receive(&mut buf), Err(RingError::Empty)));
    }

    #[test]
    fn test_wait_times_out_when_idle() {
        let adapter = MemoryAdapter::new(1);
        let session = adapter.start_session(1024).unwrap();
        let started = Instant::now();
        session.wait_readable(Duration::from_millis(20));
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_capacity_frees_after_drain() {
        let adapter = MemoryAdapter::new(1);
        let ring = adapter.ring();
        let session = adapter.start_session(4).unwrap();
        assert_eq!(session.send(b"abcd").unwrap(), 4);
        assert!(matches!(session.send(b"e"), Err(RingError::Overflow)));
        ring.take_sent();
        assert_eq!(session.send(b"e").unwrap(), 1);
    }

    #[test]
    fn test_end_releases_adapter() {
        let adapter = MemoryAdapter::new(1);
        let ring = adapter.ring();
        let session = adapter.start_session(1024).unwrap();
        assert!(!ring.adapter_released());

        session.end();
        assert!(ring.adapter_released());
        assert!(matches!(session.send(b"x"), Err(RingError::EndOfStream)));
    }
}
