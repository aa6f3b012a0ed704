//! Headless GPU compute sessions over EGL/GBM and OpenGL ES 3.1.
//!
//! A [`Session`] brings up a rendering context on a render node without any
//! display surface and captures driver diagnostics into a bounded queue.
//! Resources in [`gpu`] (programs, images, buffers, uniforms) are created
//! against the session's [`DeviceContext`].

pub mod conv2d;
pub mod diagnostics;
pub mod error;
pub mod gpu;
pub mod platform;
pub mod queue;
pub mod session;

pub use conv2d::Conv2d;
pub use diagnostics::{DebugType, DiagnosticCapture, DiagnosticRecord, Severity, Source, Verbosity};
pub use error::{describe_code, BringUpError, ComputeError, Error, PlatformError, QueueError};
pub use gpu::DeviceContext;
pub use platform::{EglGbm, Platform};
pub use queue::{MessageQueue, QueueConfig};
pub use session::{GlInfo, Session, SessionConfig, SessionState};
