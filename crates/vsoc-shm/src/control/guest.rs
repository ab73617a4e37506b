//! Guest-side control backend.
//!
//! The guest talks to a character device at `/dev/<region-name>` instead of
//! the endpoint server: interrupts and the incoming-interrupt wait are
//! ioctls, and mmap on the device maps the full region. The request numbers
//! and argument structs defined here are the driver contract.

use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr;

use crate::error::Error;
use crate::layout::RegionDescriptor;
use crate::perm::FdScopedPermission;

/// ioctl argument for creating an FD-scoped permission.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct FdScopedPermissionArg {
    /// The grant: range in the managed region, owner slot in ours.
    pub perm: FdScopedPermission,
    /// Open descriptor of the managed region's device.
    pub managed_region_fd: libc::c_int,
}

const _: () = assert!(core::mem::size_of::<FdScopedPermissionArg>() == 20);

// Linux asm-generic ioctl encoding.
const IOC_NONE: u32 = 0;
const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn ioc(dir: u32, nr: u32, size: usize) -> libc::c_ulong {
    ((dir as libc::c_ulong) << 30)
        | ((size as libc::c_ulong) << 16)
        | ((MAGIC as libc::c_ulong) << 8)
        | nr as libc::c_ulong
}

const MAGIC: u8 = 0xF5;

/// Fill a [`RegionDescriptor`] with this region's layout.
pub const DESCRIBE_REGION: libc::c_ulong =
    ioc(IOC_READ, 0, core::mem::size_of::<RegionDescriptor>());
/// Wake our own worker.
pub const SELF_INTERRUPT: libc::c_ulong = ioc(IOC_NONE, 1, 0);
/// Deliver one interrupt to the host.
pub const INTERRUPT_PEER: libc::c_ulong = ioc(IOC_NONE, 2, 0);
/// Block until an incoming interrupt is pending.
pub const WAIT_FOR_INTERRUPT: libc::c_ulong = ioc(IOC_NONE, 3, 0);
/// Create an FD-scoped permission; returns the new fd or -EBUSY.
pub const CREATE_FD_SCOPED_PERMISSION: libc::c_ulong =
    ioc(IOC_WRITE, 4, core::mem::size_of::<FdScopedPermissionArg>());

pub(super) struct GuestBackend {
    device: File,
}

impl GuestBackend {
    pub(super) fn open(name: &str) -> Result<Self, Error> {
        let path = format!("/dev/{}", name);
        let device = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(Error::ServerUnreachable)?;
        Ok(Self { device })
    }

    pub(super) fn describe(&self) -> Result<RegionDescriptor, Error> {
        let mut desc = core::mem::MaybeUninit::<RegionDescriptor>::uninit();
        // SAFETY: DESCRIBE_REGION writes exactly one RegionDescriptor
        // through the pointer.
        let ret = unsafe {
            libc::ioctl(self.device.as_raw_fd(), DESCRIBE_REGION, desc.as_mut_ptr())
        };
        if ret < 0 {
            return Err(Error::HandshakeFailed("describe-region ioctl failed"));
        }
        // SAFETY: the driver filled the descriptor on success.
        Ok(unsafe { desc.assume_init() })
    }

    pub(super) fn map(&self, len: usize) -> io::Result<*mut u8> {
        // SAFETY: the device fd is open; the driver maps the full region at
        // offset 0.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.device.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(addr.cast())
    }

    pub(super) fn interrupt_peer(&self) {
        // SAFETY: no-argument ioctl.
        let ret = unsafe { libc::ioctl(self.device.as_raw_fd(), INTERRUPT_PEER) };
        if ret < 0 {
            tracing::warn!("peer interrupt failed: {}", io::Error::last_os_error());
        }
    }

    pub(super) fn self_interrupt(&self) {
        // SAFETY: no-argument ioctl.
        let ret = unsafe { libc::ioctl(self.device.as_raw_fd(), SELF_INTERRUPT) };
        if ret < 0 {
            tracing::warn!("self interrupt failed: {}", io::Error::last_os_error());
        }
    }

    pub(super) fn wait(&self) -> io::Result<u64> {
        loop {
            // SAFETY: no-argument ioctl; blocks in the driver.
            let ret = unsafe { libc::ioctl(self.device.as_raw_fd(), WAIT_FOR_INTERRUPT) };
            if ret >= 0 {
                return Ok(1);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    pub(super) fn create_fd_scoped_permission(
        &self,
        managed_region_name: &str,
        perm: FdScopedPermission,
    ) -> Result<OwnedFd, Error> {
        let managed = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(format!("/dev/{}", managed_region_name))
            .map_err(|_| Error::NotFound(managed_region_name.to_owned()))?;
        let arg = FdScopedPermissionArg {
            perm,
            managed_region_fd: managed.as_raw_fd(),
        };
        // SAFETY: the arg struct outlives the call; the driver returns a
        // fresh fd on success.
        let ret = unsafe {
            libc::ioctl(self.device.as_raw_fd(), CREATE_FD_SCOPED_PERMISSION, &arg)
        };
        if ret >= 0 {
            // SAFETY: a non-negative return is a descriptor we now own.
            return Ok(unsafe { OwnedFd::from_raw_fd(ret) });
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EBUSY) => Err(Error::Busy),
            Some(libc::ENOTTY) | Some(libc::ENOSYS) | Some(libc::EOPNOTSUPP) => {
                Err(Error::Unsupported)
            }
            _ => {
                tracing::warn!("fd-scoped permission ioctl failed: {}", err);
                Err(Error::Unsupported)
            }
        }
    }
}
