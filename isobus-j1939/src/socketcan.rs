//! A raw-CAN (`SOCK_RAW`/`CAN_RAW`) [`Endpoint`] for Linux.
//!
//! Unlike the kernel's `CAN_J1939` socket type that `glonax-j1939` binds to,
//! this endpoint speaks plain 29-bit extended CAN frames and leaves all
//! J1939 fragmentation (TP/ETP) to `isobus-transport` — this stack is the
//! one responsible for that, not the kernel.

#![cfg(feature = "linux-socketcan")]

use crate::endpoint::Endpoint;
use crate::frame::{Frame, MAX_FRAME_LEN};
use isobus_core::error::EndpointError;
use isobus_core::identifier::Identifier;
use std::os::unix::io::{AsRawFd, RawFd};

const CAN_EFF_FLAG: u32 = 0x8000_0000;

#[repr(C)]
struct CanFrame {
    can_id: u32,
    can_dlc: u8,
    __pad: u8,
    __res0: u8,
    __res1: u8,
    data: [u8; MAX_FRAME_LEN],
}

#[repr(C)]
struct SockaddrCan {
    can_family: libc::sa_family_t,
    can_ifindex: libc::c_int,
    can_addr: [u8; 8],
}

/// A raw CAN socket bound to one network interface (e.g. `can0`).
pub struct SocketCanEndpoint {
    fd: RawFd,
}

impl SocketCanEndpoint {
    /// Open and bind a raw CAN socket on `interface` (e.g. `"can0"`), set to
    /// non-blocking mode.
    pub fn bind(interface: &str) -> Result<Self, EndpointError> {
        // SAFETY: socket() with these constant arguments has no preconditions
        // beyond what libc itself requires; the fd is owned exclusively by
        // this struct from here on and closed in Drop.
        let fd = unsafe { libc::socket(libc::PF_CAN, libc::SOCK_RAW, libc::CAN_RAW) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        let ifindex = Self::if_nametoindex(interface)?;

        let addr = SockaddrCan {
            can_family: libc::AF_CAN as libc::sa_family_t,
            can_ifindex: ifindex,
            can_addr: [0u8; 8],
        };

        // SAFETY: `addr` is a valid, fully initialized sockaddr_can-shaped
        // struct and `fd` was just created above.
        let rc = unsafe {
            libc::bind(
                fd,
                &addr as *const SockaddrCan as *const libc::sockaddr,
                std::mem::size_of::<SockaddrCan>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err.into());
        }

        Self::set_nonblocking(fd)?;

        Ok(Self { fd })
    }

    fn if_nametoindex(name: &str) -> Result<libc::c_int, EndpointError> {
        let cname = std::ffi::CString::new(name)
            .map_err(|e| EndpointError::new(format!("invalid interface name: {e}")))?;
        // SAFETY: `cname` is NUL-terminated for the duration of this call.
        let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
        if index == 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(index as libc::c_int)
    }

    fn set_nonblocking(fd: RawFd) -> Result<(), EndpointError> {
        // SAFETY: `fd` is a valid, open file descriptor owned by this call's
        // caller.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
        if flags < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }
}

impl Endpoint for SocketCanEndpoint {
    fn send(&mut self, frame: &Frame) -> Result<(), EndpointError> {
        let can_frame = CanFrame {
            can_id: frame.id.encode() | CAN_EFF_FLAG,
            can_dlc: frame.length,
            __pad: 0,
            __res0: 0,
            __res1: 0,
            data: frame.data,
        };

        // SAFETY: `can_frame` is a plain-old-data struct matching the
        // kernel's `struct can_frame` layout; `self.fd` is open for the
        // lifetime of `self`.
        let rc = unsafe {
            libc::write(
                self.fd,
                &can_frame as *const CanFrame as *const libc::c_void,
                std::mem::size_of::<CanFrame>(),
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn poll(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            let mut can_frame = CanFrame {
                can_id: 0,
                can_dlc: 0,
                __pad: 0,
                __res0: 0,
                __res1: 0,
                data: [0u8; MAX_FRAME_LEN],
            };

            // SAFETY: `can_frame` is a valid, writable buffer of the exact
            // size the kernel expects for one `struct can_frame`.
            let rc = unsafe {
                libc::read(
                    self.fd,
                    &mut can_frame as *mut CanFrame as *mut libc::c_void,
                    std::mem::size_of::<CanFrame>(),
                )
            };

            if rc <= 0 {
                break;
            }

            let id = Identifier::decode(can_frame.can_id & !CAN_EFF_FLAG);
            let length = can_frame.can_dlc.min(MAX_FRAME_LEN as u8);
            let mut data = [0xFFu8; MAX_FRAME_LEN];
            data[..length as usize].copy_from_slice(&can_frame.data[..length as usize]);

            frames.push(Frame { id, length, data });
        }
        frames
    }
}

impl AsRawFd for SocketCanEndpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for SocketCanEndpoint {
    fn drop(&mut self) {
        // SAFETY: `self.fd` is owned exclusively by this struct.
        unsafe {
            libc::close(self.fd);
        }
    }
}
