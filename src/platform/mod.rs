//! Native platform hooks used by session bring-up.
//!
//! Each method performs exactly one acquisition or release step. The session
//! drives them in order and unwinds whatever was acquired when a step fails,
//! so implementations never clean up after themselves on error.

pub mod egl;
mod gbm;

pub use egl::EglGbm;
pub use gbm::GbmDevice;

use crate::error::PlatformError;
use crate::gpu::InterfaceQueries;
use std::path::Path;

/// One acquisition/release step set for a headless rendering context.
pub trait Platform {
    /// Open device node.
    type Device;
    /// Buffer-allocation context created from the device node.
    type Allocator;
    type Display: Copy;
    type Config: Copy;
    type Context: Copy;

    fn open_device(&mut self, path: &Path) -> std::io::Result<Self::Device>;

    fn create_allocator(&mut self, device: &Self::Device) -> Result<Self::Allocator, PlatformError>;

    fn platform_display(&mut self, allocator: &Self::Allocator) -> Result<Self::Display, PlatformError>;

    fn initialize_display(&mut self, display: Self::Display) -> Result<(), PlatformError>;

    /// Space-separated extension list of an initialised display.
    fn display_extensions(&mut self, display: Self::Display) -> Result<String, PlatformError>;

    /// Picks a config with a compute-capable (GLES 3) renderable profile.
    fn choose_config(&mut self, display: Self::Display) -> Result<Self::Config, PlatformError>;

    fn bind_api(&mut self) -> Result<(), PlatformError>;

    fn create_context(
        &mut self,
        display: Self::Display,
        config: Self::Config,
    ) -> Result<Self::Context, PlatformError>;

    /// Makes `context` current without any draw or read surface.
    fn make_current(&mut self, display: Self::Display, context: Self::Context) -> Result<(), PlatformError>;

    /// Loads the GL function table of the current context, if the platform has one.
    fn load_gl(&mut self) -> Option<glow::Context>;

    /// Resolves the program-interface entry points glow leaves out.
    fn load_interface_queries(&mut self) -> InterfaceQueries {
        InterfaceQueries::default()
    }

    fn release_current(&mut self, display: Self::Display);

    fn destroy_context(&mut self, display: Self::Display, context: Self::Context);

    fn terminate_display(&mut self, display: Self::Display);

    fn destroy_allocator(&mut self, allocator: Self::Allocator);

    fn close_device(&mut self, device: Self::Device);
}
