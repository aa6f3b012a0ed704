//! Runtime-loaded libgbm entry points.

use crate::error::PlatformError;
use libloading::Library;
use std::ffi::c_void;
use std::os::fd::RawFd;
use std::ptr::NonNull;

const LIBRARY_NAMES: &[&str] = &["libgbm.so.1", "libgbm.so"];

type CreateDeviceFn = unsafe extern "C" fn(fd: RawFd) -> *mut c_void;
type DestroyDeviceFn = unsafe extern "C" fn(gbm: *mut c_void);

/// The two libgbm calls needed for a headless display.
pub(crate) struct GbmLibrary {
    create_device: CreateDeviceFn,
    destroy_device: DestroyDeviceFn,
    // keeps the function pointers above valid
    _lib: Library,
}

/// Opaque `struct gbm_device *`.
#[derive(Debug)]
pub struct GbmDevice {
    raw: NonNull<c_void>,
}

impl GbmDevice {
    pub fn as_ptr(&self) -> *mut c_void {
        self.raw.as_ptr()
    }
}

impl GbmLibrary {
    pub(crate) fn load() -> Result<Self, PlatformError> {
        let lib = LIBRARY_NAMES
            .iter()
            .find_map(|name| unsafe { Library::new(name).ok() })
            .ok_or_else(|| PlatformError::new("libgbm not found"))?;

        // SAFETY: the signatures match gbm.h and `lib` outlives the copied pointers.
        let (create_device, destroy_device) = unsafe {
            let create = *lib
                .get::<CreateDeviceFn>(b"gbm_create_device\0")
                .map_err(|e| PlatformError::new(e.to_string()))?;
            let destroy = *lib
                .get::<DestroyDeviceFn>(b"gbm_device_destroy\0")
                .map_err(|e| PlatformError::new(e.to_string()))?;
            (create, destroy)
        };

        Ok(Self {
            create_device,
            destroy_device,
            _lib: lib,
        })
    }

    pub(crate) fn create_device(&self, fd: RawFd) -> Result<GbmDevice, PlatformError> {
        // SAFETY: `fd` is an open render node owned by the caller for the device's lifetime.
        let raw = unsafe { (self.create_device)(fd) };
        NonNull::new(raw)
            .map(|raw| GbmDevice { raw })
            .ok_or_else(|| PlatformError::new("gbm_create_device returned NULL"))
    }

    pub(crate) fn destroy_device(&self, device: GbmDevice) {
        // SAFETY: `device` came from `create_device` on this library and is consumed here.
        unsafe { (self.destroy_device)(device.raw.as_ptr()) }
    }
}
