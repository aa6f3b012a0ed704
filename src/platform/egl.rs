//! EGL on a GBM device: the production headless platform.
//!
//! libEGL and libgbm are loaded the first time a stage needs them, so a bad
//! device path fails before any native library is touched.

use super::gbm::{GbmDevice, GbmLibrary};
use super::Platform;
use crate::error::PlatformError;
use crate::gpu::InterfaceQueries;
use khronos_egl as egl;
use log::debug;
use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::Path;

type EglInstance = egl::DynamicInstance<egl::EGL1_5>;

/// `EGL_PLATFORM_GBM_MESA` from EGL_MESA_platform_gbm.
const PLATFORM_GBM_MESA: egl::Enum = 0x31D7;
/// `EGL_OPENGL_ES3_BIT_KHR` from EGL_KHR_create_context.
const OPENGL_ES3_BIT: egl::Int = 0x0040;
const CONTEXT_CLIENT_VERSION: egl::Int = 0x3098;

const CONFIG_ATTRIBS: [egl::Int; 3] = [egl::RENDERABLE_TYPE, OPENGL_ES3_BIT, egl::NONE];
const CONTEXT_ATTRIBS: [egl::Int; 3] = [CONTEXT_CLIENT_VERSION, 3, egl::NONE];

fn egl_err(call: &str, e: egl::Error) -> PlatformError {
    PlatformError::new(format!("{call}: {e}"))
}

/// Headless GLES 3 context on a render node via GBM + EGL.
#[derive(Default)]
pub struct EglGbm {
    egl: Option<EglInstance>,
    gbm: Option<GbmLibrary>,
}

impl EglGbm {
    pub fn new() -> Self {
        Self::default()
    }

    fn egl(&mut self) -> Result<&EglInstance, PlatformError> {
        if self.egl.is_none() {
            // SAFETY: loading libEGL runs its initialisers; nothing else is shared yet.
            let instance = unsafe { EglInstance::load_required() }
                .map_err(|e| PlatformError::new(format!("could not load libEGL: {e}")))?;
            debug!("libEGL loaded");
            self.egl = Some(instance);
        }
        self.egl
            .as_ref()
            .ok_or_else(|| PlatformError::new("libEGL unavailable"))
    }

    fn loaded_egl(&self) -> Option<&EglInstance> {
        self.egl.as_ref()
    }
}

impl Platform for EglGbm {
    type Device = File;
    type Allocator = GbmDevice;
    type Display = egl::Display;
    type Config = egl::Config;
    type Context = egl::Context;

    fn open_device(&mut self, path: &Path) -> std::io::Result<File> {
        OpenOptions::new().read(true).write(true).open(path)
    }

    fn create_allocator(&mut self, device: &File) -> Result<GbmDevice, PlatformError> {
        if self.gbm.is_none() {
            self.gbm = Some(GbmLibrary::load()?);
            debug!("libgbm loaded");
        }
        match &self.gbm {
            Some(gbm) => gbm.create_device(device.as_raw_fd()),
            None => Err(PlatformError::new("libgbm unavailable")),
        }
    }

    fn platform_display(&mut self, allocator: &GbmDevice) -> Result<egl::Display, PlatformError> {
        let egl = self.egl()?;
        let attribs = [egl::NONE as egl::Attrib];
        // SAFETY: the GBM device stays alive until after the display is terminated.
        unsafe { egl.get_platform_display(PLATFORM_GBM_MESA, allocator.as_ptr(), &attribs) }
            .map_err(|e| egl_err("eglGetPlatformDisplay", e))
    }

    fn initialize_display(&mut self, display: egl::Display) -> Result<(), PlatformError> {
        let (major, minor) = self
            .egl()?
            .initialize(display)
            .map_err(|e| egl_err("eglInitialize", e))?;
        debug!("EGL {}.{} initialised", major, minor);
        Ok(())
    }

    fn display_extensions(&mut self, display: egl::Display) -> Result<String, PlatformError> {
        let extensions = self
            .egl()?
            .query_string(Some(display), egl::EXTENSIONS)
            .map_err(|e| egl_err("eglQueryString", e))?;
        Ok(extensions.to_string_lossy().into_owned())
    }

    fn choose_config(&mut self, display: egl::Display) -> Result<egl::Config, PlatformError> {
        self.egl()?
            .choose_first_config(display, &CONFIG_ATTRIBS)
            .map_err(|e| egl_err("eglChooseConfig", e))?
            .ok_or_else(|| PlatformError::new("no config with a GLES 3 renderable type"))
    }

    fn bind_api(&mut self) -> Result<(), PlatformError> {
        self.egl()?
            .bind_api(egl::OPENGL_ES_API)
            .map_err(|e| egl_err("eglBindAPI", e))
    }

    fn create_context(
        &mut self,
        display: egl::Display,
        config: egl::Config,
    ) -> Result<egl::Context, PlatformError> {
        self.egl()?
            .create_context(display, config, None, &CONTEXT_ATTRIBS)
            .map_err(|e| egl_err("eglCreateContext", e))
    }

    fn make_current(&mut self, display: egl::Display, context: egl::Context) -> Result<(), PlatformError> {
        self.egl()?
            .make_current(display, None, None, Some(context))
            .map_err(|e| egl_err("eglMakeCurrent", e))
    }

    fn load_gl(&mut self) -> Option<glow::Context> {
        let egl = self.loaded_egl()?;
        // SAFETY: a context is current on this thread; the loader only resolves symbols.
        let gl = unsafe {
            glow::Context::from_loader_function(|name| {
                egl.get_proc_address(name)
                    .map_or(std::ptr::null(), |f| f as *const c_void)
            })
        };
        Some(gl)
    }

    fn load_interface_queries(&mut self) -> InterfaceQueries {
        let Some(egl) = self.loaded_egl() else {
            return InterfaceQueries::default();
        };
        // SAFETY: the loader returns null or the named entry point of the current context.
        unsafe {
            InterfaceQueries::load(|name| {
                egl.get_proc_address(name)
                    .map_or(std::ptr::null(), |f| f as *const c_void)
            })
        }
    }

    fn release_current(&mut self, display: egl::Display) {
        if let Some(egl) = self.loaded_egl() {
            if let Err(e) = egl.make_current(display, None, None, None) {
                debug!("eglMakeCurrent(NONE) failed: {}", e);
            }
        }
    }

    fn destroy_context(&mut self, display: egl::Display, context: egl::Context) {
        if let Some(egl) = self.loaded_egl() {
            if let Err(e) = egl.destroy_context(display, context) {
                debug!("eglDestroyContext failed: {}", e);
            }
        }
    }

    fn terminate_display(&mut self, display: egl::Display) {
        if let Some(egl) = self.loaded_egl() {
            if let Err(e) = egl.terminate(display) {
                debug!("eglTerminate failed: {}", e);
            }
        }
    }

    fn destroy_allocator(&mut self, allocator: GbmDevice) {
        if let Some(gbm) = &self.gbm {
            gbm.destroy_device(allocator);
        }
    }

    fn close_device(&mut self, device: File) {
        drop(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device() {
        let mut platform = EglGbm::new();
        let result = platform.open_device(Path::new("/dev/dri/does-not-exist"));
        assert!(result.is_err());
        // nothing native was loaded for a failed open
        assert!(platform.loaded_egl().is_none());
        assert!(platform.gbm.is_none());
    }

    #[test]
    fn test_attrib_lists_terminated() {
        assert_eq!(CONFIG_ATTRIBS.last(), Some(&egl::NONE));
        assert_eq!(CONTEXT_ATTRIBS.last(), Some(&egl::NONE));
    }
}
