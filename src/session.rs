//! Headless session lifecycle: staged bring-up, rollback and teardown.
//!
//! Every acquisition step pushes a guard onto a stack. Rollback and teardown
//! are the same operation: pop guards and release them in reverse order.
//! The session state is simply the depth of that stack.

use crate::diagnostics::{DiagnosticCapture, DiagnosticRecord, Verbosity};
use crate::error::{
    BringUpError, ComputeError, PlatformError, EXT_CREATE_CONTEXT, EXT_SURFACELESS_CONTEXT,
};
use crate::gpu::DeviceContext;
use crate::platform::{EglGbm, Platform};
use crate::queue::QueueConfig;
use glow::HasContext;
use log::{debug, info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Default render node.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/dri/renderD128";
/// Default initial capacity of the diagnostic queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Configuration for a headless compute session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Direct-rendering device node, opened read-write.
    pub device_path: PathBuf,
    /// Minimum severity of driver diagnostics that get queued.
    pub verbosity: Verbosity,
    /// Initial capacity of the diagnostic queue.
    pub queue_capacity: usize,
    /// Growth policy of the diagnostic queue.
    pub queue: QueueConfig,
    /// Deliver driver diagnostics before the triggering call returns.
    pub synchronous_diagnostics: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from(DEFAULT_DEVICE_PATH),
            verbosity: Verbosity::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            queue: QueueConfig::default(),
            synchronous_diagnostics: false,
        }
    }
}

/// Bring-up progress. Each state names the last stage acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Uninitialized,
    DeviceOpen,
    AllocCtxReady,
    DisplayBound,
    DisplayInitialized,
    ExtensionsVerified,
    ConfigChosen,
    ApiBound,
    ContextCreated,
    /// The session is live.
    ContextCurrent,
}

const STATES: [SessionState; 10] = [
    SessionState::Uninitialized,
    SessionState::DeviceOpen,
    SessionState::AllocCtxReady,
    SessionState::DisplayBound,
    SessionState::DisplayInitialized,
    SessionState::ExtensionsVerified,
    SessionState::ConfigChosen,
    SessionState::ApiBound,
    SessionState::ContextCreated,
    SessionState::ContextCurrent,
];

/// Renderer identification of a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlInfo {
    pub renderer: String,
    pub version: String,
}

/// One acquired bring-up stage and what is needed to release it.
enum Acquired<P: Platform> {
    Device(P::Device),
    Allocator(P::Allocator),
    Display(P::Display),
    DisplayInitialized(P::Display),
    ExtensionsVerified,
    Config(P::Config),
    ApiBound,
    Context {
        display: P::Display,
        context: P::Context,
    },
    Current {
        display: P::Display,
    },
}

/// Whether `name` appears as a whole word in a space-separated extension list.
fn has_extension(extensions: &str, name: &str) -> bool {
    extensions.split_whitespace().any(|ext| ext == name)
}

/// A headless GPU compute session.
pub struct Session<P: Platform = EglGbm> {
    config: SessionConfig,
    platform: P,
    stack: Vec<Acquired<P>>,
    capture: Option<Arc<Mutex<DiagnosticCapture>>>,
    context: Option<DeviceContext>,
    /// Accepted diagnostics of earlier live periods.
    retired_total: u64,
}

impl Session<EglGbm> {
    /// Session on the EGL/GBM platform.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_platform(config, EglGbm::new())
    }
}

impl<P: Platform> Session<P> {
    pub fn with_platform(config: SessionConfig, platform: P) -> Self {
        Self {
            config,
            platform,
            stack: Vec::new(),
            capture: None,
            context: None,
            retired_total: 0,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        STATES[self.stack.len().min(STATES.len() - 1)]
    }

    pub fn is_live(&self) -> bool {
        self.state() == SessionState::ContextCurrent
    }

    /// Brings the session up stage by stage.
    ///
    /// On failure every stage acquired so far is released in reverse order
    /// and the session is back to `Uninitialized`. A live session is left
    /// untouched and reported as `AlreadyInitialized`.
    pub fn bring_up(&mut self) -> Result<(), BringUpError> {
        if self.is_live() {
            return Err(BringUpError::AlreadyInitialized);
        }
        if !self.stack.is_empty() {
            self.teardown();
        }

        match self.acquire_all() {
            Ok(()) => {
                info!(
                    "session live on {}",
                    self.config.device_path.display()
                );
                Ok(())
            }
            Err(e) => {
                warn!("bring-up failed at {:?}: {}", self.state(), e);
                self.teardown();
                Err(e)
            }
        }
    }

    fn acquire_all(&mut self) -> Result<(), BringUpError> {
        let path = self.config.device_path.clone();
        let device = self
            .platform
            .open_device(&path)
            .map_err(|source| BringUpError::DevicePath { path, source })?;
        self.stack.push(Acquired::Device(device));

        let allocator = match self.stack.last() {
            Some(Acquired::Device(device)) => self.platform.create_allocator(device),
            _ => Err(PlatformError::new("device is not open")),
        }
        .map_err(BringUpError::AllocContext)?;
        self.stack.push(Acquired::Allocator(allocator));

        let display = match self.stack.last() {
            Some(Acquired::Allocator(allocator)) => self.platform.platform_display(allocator),
            _ => Err(PlatformError::new("allocation context is missing")),
        }
        .map_err(BringUpError::PlatformDisplay)?;
        self.stack.push(Acquired::Display(display));

        self.platform
            .initialize_display(display)
            .map_err(BringUpError::DisplayInit)?;
        self.stack.push(Acquired::DisplayInitialized(display));

        let extensions = self.platform.display_extensions(display).map_err(|e| {
            debug!("extension query failed: {}", e);
            BringUpError::MissingExtension(EXT_CREATE_CONTEXT)
        })?;
        for name in [EXT_CREATE_CONTEXT, EXT_SURFACELESS_CONTEXT] {
            if !has_extension(&extensions, name) {
                return Err(BringUpError::MissingExtension(name));
            }
        }
        self.stack.push(Acquired::ExtensionsVerified);

        let config = self
            .platform
            .choose_config(display)
            .map_err(BringUpError::Config)?;
        self.stack.push(Acquired::Config(config));

        self.platform.bind_api().map_err(BringUpError::BindApi)?;
        self.stack.push(Acquired::ApiBound);

        let context = self
            .platform
            .create_context(display, config)
            .map_err(BringUpError::CreateContext)?;
        self.stack.push(Acquired::Context { display, context });

        self.platform
            .make_current(display, context)
            .map_err(BringUpError::MakeCurrent)?;
        self.stack.push(Acquired::Current { display });

        self.attach_diagnostics();
        Ok(())
    }

    /// Allocates the capture pipeline and registers it with the driver.
    fn attach_diagnostics(&mut self) {
        let capture = Arc::new(Mutex::new(
            DiagnosticCapture::with_config(
                self.config.queue_capacity,
                self.config.queue,
                self.config.verbosity,
            )
            .with_first_seq(self.retired_total),
        ));
        self.capture = Some(Arc::clone(&capture));

        let Some(mut gl) = self.platform.load_gl() else {
            debug!("platform has no GL function table");
            return;
        };

        // SAFETY: the context was made current on this thread just before.
        unsafe {
            if gl.supports_debug() {
                gl.enable(glow::DEBUG_OUTPUT);
                if self.config.synchronous_diagnostics {
                    gl.enable(glow::DEBUG_OUTPUT_SYNCHRONOUS);
                }
                let sink = Arc::clone(&capture);
                gl.debug_message_callback(move |source, kind, id, severity, message| {
                    sink.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .on_driver_message(source, kind, id, severity, message);
                });
            } else {
                warn!("driver has no debug output, diagnostics will stay empty");
            }
        }
        let interface = self.platform.load_interface_queries();
        if !interface.is_available() {
            debug!("program-interface queries unavailable, storage blocks cannot be listed");
        }
        self.context = Some(DeviceContext::new(gl, interface, capture));
    }

    /// Releases everything acquired, newest first. Safe to call at any state, repeatedly.
    pub fn teardown(&mut self) {
        if self.stack.is_empty() {
            return;
        }
        debug!("tearing down session from {:?}", self.state());
        while let Some(stage) = self.stack.pop() {
            self.release(stage);
        }
    }

    fn release(&mut self, stage: Acquired<P>) {
        match stage {
            Acquired::Current { display } => {
                self.detach_diagnostics();
                self.platform.release_current(display);
            }
            Acquired::Context { display, context } => {
                self.platform.destroy_context(display, context)
            }
            Acquired::ApiBound | Acquired::Config(_) | Acquired::ExtensionsVerified => {}
            Acquired::DisplayInitialized(display) => self.platform.terminate_display(display),
            Acquired::Display(_) => {}
            Acquired::Allocator(allocator) => self.platform.destroy_allocator(allocator),
            Acquired::Device(device) => self.platform.close_device(device),
        }
    }

    /// Stops driver callbacks and drains whatever is still queued.
    fn detach_diagnostics(&mut self) {
        if let Some(mut context) = self.context.take() {
            // SAFETY: the context is still current; it is released right after.
            unsafe { context.gl_mut().disable(glow::DEBUG_OUTPUT) };
        }
        if let Some(capture) = self.capture.take() {
            let mut capture = capture.lock().unwrap_or_else(PoisonError::into_inner);
            for record in capture.drain_records() {
                debug!("{}", record);
            }
            self.retired_total += capture.total();
        }
    }

    /// Live device context for resource operations.
    pub fn context(&self) -> Result<&DeviceContext, ComputeError> {
        self.context.as_ref().ok_or(ComputeError::NotLive)
    }

    /// Renderer and version strings of the live context.
    pub fn gl_info(&self) -> Option<GlInfo> {
        let gl = self.context.as_ref()?.gl();
        // SAFETY: the context is current while the session is live.
        unsafe {
            Some(GlInfo {
                renderer: gl.get_parameter_string(glow::RENDERER),
                version: gl.get_parameter_string(glow::VERSION),
            })
        }
    }

    /// Sets the minimum severity queued from now on.
    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.config.verbosity = verbosity;
        if let Some(capture) = &self.capture {
            capture
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .set_verbosity(verbosity);
        }
    }

    /// Total diagnostics accepted over the session's lifetime.
    pub fn total_errors(&self) -> u64 {
        let live = self.capture.as_ref().map_or(0, |capture| {
            capture.lock().unwrap_or_else(PoisonError::into_inner).total()
        });
        self.retired_total + live
    }

    /// Number of diagnostics waiting to be drained.
    pub fn pending_diagnostics(&self) -> usize {
        self.capture.as_ref().map_or(0, |capture| {
            capture.lock().unwrap_or_else(PoisonError::into_inner).pending()
        })
    }

    /// Writes every queued diagnostic to `sink`, one line each. Returns the count.
    pub fn drain_diagnostics_to<W: Write + ?Sized>(&self, sink: &mut W) -> std::io::Result<usize> {
        match &self.capture {
            Some(capture) => capture
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain_to(sink),
            None => Ok(0),
        }
    }

    /// Pops every queued diagnostic.
    pub fn drain_diagnostics(&self) -> Vec<DiagnosticRecord> {
        self.capture.as_ref().map_or_else(Vec::new, |capture| {
            capture
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain_records()
        })
    }

    /// The capture pipeline shared with the driver callback, while live.
    pub fn capture(&self) -> Option<Arc<Mutex<DiagnosticCapture>>> {
        self.capture.clone()
    }
}

impl<P: Platform> Drop for Session<P> {
    fn drop(&mut self) {
        self.teardown();
    }
}
