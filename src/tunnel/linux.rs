//! Linux TUN backend
//!
//! The kernel queue plays the role of the ring: the device fd is switched
//! to non-blocking mode, `EAGAIN` on read means no packet, `EAGAIN` or
//! `ENOBUFS` on write means the queue is full. Waiting uses `poll(2)` on the
//! device fd plus a self-pipe that `end()` writes to, so a close wakes a
//! blocked reader at once. The session owns the device; `end()` takes it
//! out from under the lock readers use for each syscall, which closes the
//! fd and removes the interface.

use super::{Adapter, RingError, RingSession};
use crate::error::{Result, VpnError};
use std::ffi::CString;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard};
use std::time::Duration;

/// Kernel TUN interface
pub struct LinuxAdapter {
    device: tun::platform::Device,
    ifindex: u64,
}

impl LinuxAdapter {
    /// Create and bring up `name`
    pub fn create(name: &str, mtu: usize) -> Result<Self> {
        let Ok(mtu) = i32::try_from(mtu) else {
            return Err(VpnError::DeviceCreate(format!("invalid MTU {mtu}")));
        };

        let mut config = tun::Configuration::default();
        config.name(name).mtu(mtu).up();
        config.platform(|config| {
            config.packet_information(false);
        });

        let device = tun::create(&config)
            .map_err(|e| VpnError::DeviceCreate(format!("failed to create adapter: {e}")))?;

        set_nonblocking(device.as_raw_fd())
            .map_err(|e| VpnError::DeviceCreate(format!("failed to set non-blocking: {e}")))?;

        let ifindex = interface_index(name);
        log::debug!("Created TUN interface {name} (ifindex {ifindex})");

        Ok(Self { device, ifindex })
    }
}

impl Adapter for LinuxAdapter {
    type Session = LinuxSession;

    fn start_session(self, _capacity: u32) -> io::Result<LinuxSession> {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: fds is a valid two-element array.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        for fd in fds {
            if let Err(e) = set_nonblocking(fd) {
                // SAFETY: both descriptors were just returned by pipe().
                unsafe {
                    libc::close(fds[0]);
                    libc::close(fds[1]);
                }
                return Err(e);
            }
        }

        Ok(LinuxSession {
            device: RwLock::new(Some(self.device)),
            ifindex: self.ifindex,
            wake_rx: fds[0],
            wake_tx: fds[1],
            ended: AtomicBool::new(false),
        })
    }

    fn luid(&self) -> u64 {
        self.ifindex
    }
}

pub struct LinuxSession {
    // None once the session has ended
    device: RwLock<Option<tun::platform::Device>>,
    ifindex: u64,
    wake_rx: RawFd,
    wake_tx: RawFd,
    ended: AtomicBool,
}

impl LinuxSession {
    fn device(&self) -> RwLockReadGuard<'_, Option<tun::platform::Device>> {
        self.device
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RingSession for LinuxSession {
    fn receive(&self, buf: &mut [u8]) -> std::result::Result<usize, RingError> {
        if self.ended.load(Ordering::Acquire) {
            return Err(RingError::EndOfStream);
        }
        let guard = self.device();
        let fd = guard.as_ref().ok_or(RingError::EndOfStream)?.as_raw_fd();
        // SAFETY: buf is valid for buf.len() bytes and the guard keeps fd open.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n > 0 {
            return Ok(n as usize);
        }
        if n == 0 {
            return Err(RingError::EndOfStream);
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EINTR) => Err(RingError::Empty),
            Some(libc::EBADF) => Err(RingError::EndOfStream),
            Some(libc::EFAULT) => Err(RingError::Corrupt),
            _ => Err(RingError::Other(err)),
        }
    }

    fn wait_readable(&self, timeout: Duration) {
        if self.ended.load(Ordering::Acquire) {
            return;
        }
        // Held across poll; end() writes the wake pipe before taking the lock.
        let guard = self.device();
        let Some(device) = guard.as_ref() else {
            return;
        };
        let mut fds = [
            libc::pollfd {
                fd: device.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: self.wake_rx,
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        // SAFETY: fds points to two initialised pollfd entries.
        unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, millis) };
    }

    fn send(&self, packet: &[u8]) -> std::result::Result<usize, RingError> {
        if self.ended.load(Ordering::Acquire) {
            return Err(RingError::EndOfStream);
        }
        let guard = self.device();
        let fd = guard.as_ref().ok_or(RingError::EndOfStream)?.as_raw_fd();
        // SAFETY: packet is valid for packet.len() bytes and the guard keeps fd open.
        let n = unsafe { libc::write(fd, packet.as_ptr().cast(), packet.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::ENOBUFS) => Err(RingError::Overflow),
            Some(libc::EBADF) | Some(libc::EIO) => Err(RingError::EndOfStream),
            _ => Err(RingError::Other(err)),
        }
    }

    fn end(&self) {
        if !self.ended.swap(true, Ordering::AcqRel) {
            let byte = 1u8;
            // SAFETY: wake_tx stays open until drop.
            unsafe { libc::write(self.wake_tx, (&byte as *const u8).cast(), 1) };
        }

        let device = self
            .device
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(device) = device {
            drop(device);
            log::debug!("Released TUN interface (ifindex {})", self.ifindex);
        }
    }
}

impl Drop for LinuxSession {
    fn drop(&mut self) {
        // SAFETY: the pipe descriptors are owned by this session.
        unsafe {
            libc::close(self.wake_rx);
            libc::close(self.wake_tx);
        }
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn interface_index(name: &str) -> u64 {
    match CString::new(name) {
        // SAFETY: c_name is a valid NUL-terminated string.
        Ok(c_name) => u64::from(unsafe { libc::if_nametoindex(c_name.as_ptr()) }),
        Err(_) => 0,
    }
}
