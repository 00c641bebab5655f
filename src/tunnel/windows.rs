//! Windows Wintun backend
//!
//! Wintun exposes a shared-memory ring per session. Ring status is reported
//! through the thread's last Win32 error, which is classified right after
//! each failed call. The session owns the adapter; `end()` signals a
//! shutdown event that interrupts the read wait, then drops both handles
//! so the adapter is removed even while other threads hold the device.

use super::{Adapter, RingError, RingSession, ADAPTER_GUID, TUNNEL_TYPE};
use crate::error::{Result, VpnError};
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;
use winapi::shared::minwindef::{FALSE, TRUE};
use winapi::shared::winerror::{
    ERROR_BUFFER_OVERFLOW, ERROR_HANDLE_EOF, ERROR_INVALID_DATA, ERROR_NO_MORE_ITEMS,
};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::handleapi::CloseHandle;
use winapi::um::synchapi::{CreateEventW, SetEvent, WaitForMultipleObjects};
use winapi::um::winnt::HANDLE;

/// Wintun adapter; closed when the last handle is dropped
pub struct WintunAdapter {
    adapter: Arc<wintun::Adapter>,
    luid: u64,
}

impl WintunAdapter {
    /// Load wintun.dll and create the adapter `name`
    pub fn create(name: &str) -> Result<Self> {
        // SAFETY: loads the Wintun driver library shipped next to the binary.
        let wintun = unsafe { wintun::load() }
            .map_err(|e| VpnError::DeviceCreate(format!("failed to load wintun.dll: {e}")))?;

        let adapter = wintun::Adapter::create(&wintun, name, TUNNEL_TYPE, Some(ADAPTER_GUID))
            .map_err(|e| VpnError::DeviceCreate(format!("failed to create adapter: {e}")))?;

        // SAFETY: NET_LUID_LH is a plain 64-bit union.
        let luid = unsafe { adapter.get_luid().Value };
        log::debug!("Created Wintun adapter {name} (luid {luid:#x})");

        Ok(Self { adapter, luid })
    }
}

impl Adapter for WintunAdapter {
    type Session = WintunSession;

    fn start_session(self, capacity: u32) -> io::Result<WintunSession> {
        let shutdown = Event::manual_reset()?;
        let session: Arc<wintun::Session> = self
            .adapter
            .start_session(capacity)
            .map(Arc::from)
            .map_err(|e| io::Error::other(e.to_string()))?;

        Ok(WintunSession {
            live: RwLock::new(Some(Live {
                session,
                adapter: self.adapter,
            })),
            luid: self.luid,
            shutdown,
            ended: AtomicBool::new(false),
        })
    }

    fn luid(&self) -> u64 {
        self.luid
    }
}

/// Owned Win32 event handle
struct Event(HANDLE);

// SAFETY: event handles may be signalled and waited on from any thread.
unsafe impl Send for Event {}
unsafe impl Sync for Event {}

impl Event {
    fn manual_reset() -> io::Result<Self> {
        // SAFETY: no security attributes, unnamed, manual reset, initially clear.
        let handle = unsafe { CreateEventW(ptr::null_mut(), TRUE, FALSE, ptr::null()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(handle))
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        // SAFETY: the handle was created by CreateEventW and is closed once.
        unsafe { CloseHandle(self.0) };
    }
}

/// Handles released by `end()`; the session drops before its adapter
struct Live {
    session: Arc<wintun::Session>,
    #[allow(dead_code)]
    adapter: Arc<wintun::Adapter>,
}

pub struct WintunSession {
    live: RwLock<Option<Live>>,
    luid: u64,
    shutdown: Event,
    ended: AtomicBool,
}

impl WintunSession {
    fn live(&self) -> RwLockReadGuard<'_, Option<Live>> {
        self.live
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Map the last Win32 error after a failed ring call
fn last_ring_error(context: &str, err: impl std::fmt::Display) -> RingError {
    // SAFETY: reads the calling thread's last-error value.
    match unsafe { GetLastError() } {
        ERROR_NO_MORE_ITEMS => RingError::Empty,
        ERROR_HANDLE_EOF => RingError::EndOfStream,
        ERROR_INVALID_DATA => RingError::Corrupt,
        ERROR_BUFFER_OVERFLOW => RingError::Overflow,
        _ => RingError::Other(io::Error::other(format!("{context}: {err}"))),
    }
}

impl RingSession for WintunSession {
    fn receive(&self, buf: &mut [u8]) -> std::result::Result<usize, RingError> {
        if self.ended.load(Ordering::Acquire) {
            return Err(RingError::EndOfStream);
        }
        let guard = self.live();
        let live = guard.as_ref().ok_or(RingError::EndOfStream)?;
        match live.session.try_receive() {
            Ok(Some(packet)) => {
                let bytes = packet.bytes();
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Ok(None) => Err(RingError::Empty),
            Err(e) => Err(last_ring_error("receive", e)),
        }
    }

    fn wait_readable(&self, timeout: Duration) {
        if self.ended.load(Ordering::Acquire) {
            return;
        }
        let millis = timeout.as_millis().min(u128::from(u32::MAX)) as u32;
        // Held across the wait; end() signals `shutdown` before taking the lock.
        let guard = self.live();
        let Some(live) = guard.as_ref() else {
            return;
        };
        match live.session.get_read_wait_event() {
            Ok(event) => {
                let handles = [event as HANDLE, self.shutdown.0];
                // SAFETY: both handles stay open while the read guard is held.
                unsafe { WaitForMultipleObjects(2, handles.as_ptr(), FALSE, millis) };
            }
            Err(_) => {
                drop(guard);
                std::thread::sleep(timeout);
            }
        }
    }

    fn send(&self, packet: &[u8]) -> std::result::Result<usize, RingError> {
        if self.ended.load(Ordering::Acquire) {
            return Err(RingError::EndOfStream);
        }
        let size = u16::try_from(packet.len()).map_err(|_| {
            RingError::Other(io::Error::new(
                io::ErrorKind::InvalidInput,
                "packet larger than 65535 bytes",
            ))
        })?;

        let guard = self.live();
        let live = guard.as_ref().ok_or(RingError::EndOfStream)?;
        match live.session.allocate_send_packet(size) {
            Ok(mut slot) => {
                slot.bytes_mut().copy_from_slice(packet);
                live.session.send_packet(slot);
                Ok(packet.len())
            }
            Err(e) => Err(last_ring_error("send", e)),
        }
    }

    fn end(&self) {
        if !self.ended.swap(true, Ordering::AcqRel) {
            // SAFETY: the event stays open until the session is dropped.
            unsafe { SetEvent(self.shutdown.0) };
        }

        let live = self
            .live
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(live) = live {
            if let Err(e) = live.session.shutdown() {
                log::warn!("Wintun session shutdown failed: {e}");
            }
            drop(live);
            log::debug!("Released Wintun adapter (luid {:#x})", self.luid);
        }
    }
}
