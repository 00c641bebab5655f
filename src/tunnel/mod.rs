//! Packet tunnel device
//!
//! `TunnelDevice` wraps the ring-buffered I/O session started on an OS
//! adapter. The session owns the adapter, so ending it releases the OS
//! interface. Reads and writes may run concurrently from separate
//! forwarding threads; the only state they share is an atomic closed flag
//! and a run-once close guard, so `close()` is safe while I/O is in flight.
//!
//! Backends:
//! - `windows`: Wintun adapter and ring session
//! - `linux`: kernel TUN device, non-blocking fd with `poll(2)`
//! - `memory`: in-process ring, used by tests and benchmarks

use crate::error::{Result, VpnError};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;
use std::time::Duration;

pub mod memory;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "windows")]
pub mod windows;

/// Ring capacity requested for the I/O session (8 MiB)
pub const RING_CAPACITY: u32 = 0x80_0000;

/// Upper bound on one wait for inbound packets, and so on `close()` latency
pub const READ_WAIT_INTERVAL: Duration = Duration::from_millis(500);

/// Tunnel type label shown by the OS for the adapter
pub const TUNNEL_TYPE: &str = "TLSLink Secure";

/// Stable adapter identifier so the OS reuses the same network profile
pub const ADAPTER_GUID: u128 = 0x0000_0000_FFFF_FFFF_FFE9_76E5_8C74_063E;

/// Outcome of a single ring operation that did not move a packet
#[derive(Debug)]
pub enum RingError {
    /// Nothing queued right now
    Empty,
    /// The session has ended
    EndOfStream,
    /// Ring memory no longer consistent
    Corrupt,
    /// No room for the outbound packet
    Overflow,
    Other(io::Error),
}

/// Ring-buffered packet session on an adapter
pub trait RingSession: Send + Sync {
    /// Copy one inbound packet into `buf`, returning its length
    fn receive(&self, buf: &mut [u8]) -> std::result::Result<usize, RingError>;

    /// Block until a packet may be readable, the session ends, or `timeout`
    fn wait_readable(&self, timeout: Duration);

    /// Queue one outbound packet
    fn send(&self, packet: &[u8]) -> std::result::Result<usize, RingError>;

    /// End the session, wake any waiter and release the adapter
    fn end(&self);
}

/// OS adapter able to start a ring session
pub trait Adapter: Send + Sync + Sized {
    type Session: RingSession;

    /// Start a session that takes ownership of the adapter. On failure the
    /// adapter is dropped, which releases it.
    fn start_session(self, capacity: u32) -> io::Result<Self::Session>;

    /// Platform link identifier (LUID on Windows, ifindex on Linux)
    fn luid(&self) -> u64;
}

/// Packet device as seen by the forwarding loops
pub trait Device: Send + Sync {
    /// Read one packet into `buf[offset..]`
    fn read(&self, buf: &mut [u8], offset: usize) -> Result<usize>;

    /// Write `buf[offset..]` as one packet; `Ok(0)` means it was dropped
    fn write(&self, buf: &[u8], offset: usize) -> Result<usize>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn mtu(&self) -> usize;

    fn name(&self) -> &str;

    fn close(&self) -> Result<()>;
}

pub struct TunnelDevice<A: Adapter> {
    session: A::Session,
    name: String,
    mtu: usize,
    luid: u64,
    closed: AtomicBool,
    close_once: Once,
}

impl<A: Adapter> TunnelDevice<A> {
    /// Start the I/O session on `adapter`; the adapter is released on failure
    pub fn with_adapter(adapter: A, name: &str, mtu: usize) -> Result<Self> {
        let luid = adapter.luid();
        let session = adapter
            .start_session(RING_CAPACITY)
            .map_err(|e| VpnError::DeviceCreate(format!("failed to start session: {e}")))?;
        log::info!("TUN device '{name}' ready (mtu {mtu}, luid {luid:#x})");

        Ok(Self {
            session,
            name: name.to_string(),
            mtu,
            luid,
            closed: AtomicBool::new(false),
            close_once: Once::new(),
        })
    }

    pub fn luid(&self) -> u64 {
        self.luid
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<A: Adapter> Device for TunnelDevice<A> {
    fn read(&self, buf: &mut [u8], offset: usize) -> Result<usize> {
        let buf = buf
            .get_mut(offset..)
            .ok_or_else(|| VpnError::Device(format!("read offset {offset} out of range")))?;

        loop {
            if self.is_closed() {
                return Err(VpnError::DeviceClosed);
            }
            match self.session.receive(buf) {
                Ok(n) => return Ok(n),
                Err(RingError::Empty) => self.session.wait_readable(READ_WAIT_INTERVAL),
                Err(RingError::EndOfStream) => return Err(VpnError::DeviceClosed),
                Err(RingError::Corrupt) => return Err(VpnError::DeviceCorrupt),
                Err(RingError::Overflow) => {
                    return Err(VpnError::Device("read failed: ring overflow".to_string()))
                }
                Err(RingError::Other(e)) => {
                    return Err(VpnError::Device(format!("read failed: {e}")))
                }
            }
        }
    }

    fn write(&self, buf: &[u8], offset: usize) -> Result<usize> {
        if self.is_closed() {
            return Err(VpnError::DeviceClosed);
        }
        let packet = buf
            .get(offset..)
            .ok_or_else(|| VpnError::Device(format!("write offset {offset} out of range")))?;
        if packet.is_empty() {
            return Ok(0);
        }

        match self.session.send(packet) {
            Ok(n) => Ok(n),
            Err(RingError::Overflow) => {
                log::trace!("Send ring full, dropping {} byte packet", packet.len());
                Ok(0)
            }
            Err(RingError::EndOfStream) => Err(VpnError::DeviceClosed),
            Err(RingError::Corrupt) => Err(VpnError::DeviceCorrupt),
            Err(RingError::Empty) => Ok(0),
            Err(RingError::Other(e)) => Err(VpnError::Device(format!("write failed: {e}"))),
        }
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&self) -> Result<()> {
        self.close_once.call_once(|| {
            self.closed.store(true, Ordering::Release);
            self.session.end();
            log::info!("TUN device '{}' closed", self.name);
        });
        Ok(())
    }
}

impl<A: Adapter> Drop for TunnelDevice<A> {
    fn drop(&mut self) {
        let _ = Device::close(self);
    }
}

#[cfg(target_os = "windows")]
pub type NativeTun = TunnelDevice<windows::WintunAdapter>;

#[cfg(target_os = "linux")]
pub type NativeTun = TunnelDevice<linux::LinuxAdapter>;

/// Create the platform adapter `name` and start its I/O session
#[cfg(target_os = "windows")]
pub fn create_tun(name: &str, mtu: usize) -> Result<NativeTun> {
    let adapter = windows::WintunAdapter::create(name)?;
    TunnelDevice::with_adapter(adapter, name, mtu)
}

/// Create the platform adapter `name` and start its I/O session
#[cfg(target_os = "linux")]
pub fn create_tun(name: &str, mtu: usize) -> Result<NativeTun> {
    let adapter = linux::LinuxAdapter::create(name, mtu)?;
    TunnelDevice::with_adapter(adapter, name, mtu)
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryAdapter, MemoryRing};
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn device() -> (TunnelDevice<MemoryAdapter>, Arc<MemoryRing>) {
        let adapter = MemoryAdapter::new(7);
        let ring = adapter.ring();
        let dev = TunnelDevice::with_adapter(adapter, "tun-test", 1400).unwrap();
        (dev, ring)
    }

    #[test]
    fn test_identity_accessors() {
        let (dev, _) = device();
        assert_eq!(dev.name(), "tun-test");
        assert_eq!(dev.mtu(), 1400);
        assert_eq!(dev.luid(), 7);
    }

    #[test]
    fn test_read_at_offset() {
        let (dev, ring) = device();
        ring.inject(b"packet".to_vec());

        let mut buf = [0u8; 32];
        let n = dev.read(&mut buf, 4).unwrap();
        assert_eq!(n, 6);
        assert_eq!(&buf[4..10], b"packet");
        assert_eq!(&buf[..4], &[0u8; 4]);
    }

    #[test]
    fn test_write_at_offset() {
        let (dev, ring) = device();
        let n = dev.write(b"hdr:payload", 4).unwrap();
        assert_eq!(n, 7);
        assert_eq!(ring.take_sent(), vec![b"payload".to_vec()]);
    }

    #[test]
    fn test_offset_out_of_range() {
        let (dev, _) = device();
        let mut buf = [0u8; 4];
        assert!(matches!(dev.read(&mut buf, 5), Err(VpnError::Device(_))));
        assert!(matches!(dev.write(&buf, 5), Err(VpnError::Device(_))));
    }

    #[test]
    fn test_full_ring_drops_without_error() {
        let adapter = MemoryAdapter::new(1).with_capacity(8);
        let ring = adapter.ring();
        let dev = TunnelDevice::with_adapter(adapter, "tun-full", 1400).unwrap();

        assert_eq!(dev.write(b"12345678", 0).unwrap(), 8);
        assert_eq!(dev.write(b"overflow", 0).unwrap(), 0);
        assert_eq!(ring.take_sent().len(), 1);
    }

    #[test]
    fn test_corrupt_ring_is_fatal() {
        let (dev, ring) = device();
        ring.mark_corrupt();
        let mut buf = [0u8; 16];
        assert!(matches!(dev.read(&mut buf, 0), Err(VpnError::DeviceCorrupt)));
    }

    #[test]
    fn test_end_of_stream_reads_as_closed() {
        let (dev, ring) = device();
        ring.end();
        let mut buf = [0u8; 16];
        assert!(matches!(dev.read(&mut buf, 0), Err(VpnError::DeviceClosed)));
        assert!(matches!(dev.write(b"x", 0), Err(VpnError::DeviceClosed)));
    }

    #[test]
    fn test_closed_device_does_not_touch_ring() {
        let (dev, ring) = device();
        dev.close().unwrap();
        let before = ring.operation_count();

        let mut buf = [0u8; 16];
        assert!(matches!(dev.read(&mut buf, 0), Err(VpnError::DeviceClosed)));
        assert!(matches!(dev.write(b"x", 0), Err(VpnError::DeviceClosed)));
        assert_eq!(ring.operation_count(), before);
    }

    #[test]
    fn test_concurrent_close_runs_teardown_once() {
        let (dev, ring) = device();
        let dev = Arc::new(dev);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dev = Arc::clone(&dev);
                thread::spawn(move || dev.close().unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(dev.is_closed());
        assert_eq!(ring.end_count(), 1);
        assert!(ring.adapter_released());
    }

    #[test]
    fn test_close_releases_adapter_while_device_is_shared() {
        let (dev, ring) = device();
        let dev = Arc::new(dev);
        let reader = Arc::clone(&dev);

        assert!(!ring.adapter_released());
        dev.close().unwrap();
        assert!(ring.adapter_released());

        let mut buf = [0u8; 16];
        assert!(matches!(reader.read(&mut buf, 0), Err(VpnError::DeviceClosed)));
        drop(reader);
        assert_eq!(ring.end_count(), 1);
    }

    #[test]
    fn test_close_wakes_blocked_reader() {
        let (dev, _) = device();
        let dev = Arc::new(dev);

        let reader = {
            let dev = Arc::clone(&dev);
            thread::spawn(move || {
                let mut buf = [0u8; 64];
                dev.read(&mut buf, 0)
            })
        };

        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        dev.close().unwrap();
        let result = reader.join().unwrap();

        assert!(matches!(result, Err(VpnError::DeviceClosed)));
        assert!(started.elapsed() < READ_WAIT_INTERVAL * 2);
    }

    #[test]
    fn test_failed_session_releases_adapter() {
        let adapter = MemoryAdapter::new(3).failing_session();
        let ring = adapter.ring();
        let result = TunnelDevice::with_adapter(adapter, "tun-fail", 1400);
        assert!(matches!(result, Err(VpnError::DeviceCreate(_))));
        assert!(ring.adapter_released());
    }
}
