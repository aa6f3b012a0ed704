//! Live device context shared by every resource operation.

use crate::diagnostics::{DiagnosticCapture, Source};
use super::interface::InterfaceQueries;
use crate::error::ComputeError;
use glow::HasContext;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Upper bound on `glGetError` polls per drain; a lost context may never report `NO_ERROR`.
const MAX_ERROR_POLLS: u32 = 64;

/// GL function table of a live session plus its diagnostic capture pipeline.
pub struct DeviceContext {
    gl: glow::Context,
    /// Entry points outside the glow table, possibly unavailable.
    interface: InterfaceQueries,
    capture: Arc<Mutex<DiagnosticCapture>>,
}

impl DeviceContext {
    pub(crate) fn new(
        gl: glow::Context,
        interface: InterfaceQueries,
        capture: Arc<Mutex<DiagnosticCapture>>,
    ) -> Self {
        Self {
            gl,
            interface,
            capture,
        }
    }

    pub fn interface(&self) -> &InterfaceQueries {
        &self.interface
    }

    /// Raw GL function table.
    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    pub(crate) fn gl_mut(&mut self) -> &mut glow::Context {
        &mut self.gl
    }

    /// Locks the capture pipeline. Never hold the guard across a GL call.
    pub fn capture(&self) -> MutexGuard<'_, DiagnosticCapture> {
        self.capture.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drains pending driver error indicators, returning how many were raised.
    pub fn drain_errors(&self) -> u32 {
        let mut count = 0;
        // SAFETY: the context is current on the calling thread while the session is live.
        while count < MAX_ERROR_POLLS && unsafe { self.gl.get_error() } != glow::NO_ERROR {
            count += 1;
        }
        count
    }

    /// Drains error indicators and fails with their count if any were raised.
    pub fn check(&self, op: &'static str) -> Result<(), ComputeError> {
        match self.drain_errors() {
            0 => Ok(()),
            count => Err(ComputeError::Gl { op, count }),
        }
    }

    /// Queues each line of a compile or link log as a high-severity record.
    pub(crate) fn capture_log(&self, source: Source, log: &str) -> usize {
        self.capture().capture_log(source, log)
    }
}
