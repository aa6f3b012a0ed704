//! Error types for compute sessions.
//!
//! Bring-up failures and runtime resource failures are two disjoint classes:
//! the former carry a stable negative code per bring-up stage, the latter the
//! number of driver error indicators drained after the failing operation.

use std::path::PathBuf;
use thiserror::Error;

/// Code reported when no error occurred.
pub const CODE_NO_ERROR: i32 = 0;
/// Group code for bring-up failures.
pub const CODE_GROUP_INIT: i32 = -100;
/// Group code for driver (GL) errors, see the diagnostic queue for detail.
pub const CODE_GROUP_GL_ERROR: i32 = 0x0500;

/// Error raised by a native platform hook.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PlatformError(pub String);

impl PlatformError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Session bring-up failure, one variant per acquisition stage.
#[derive(Error, Debug)]
pub enum BringUpError {
    /// Bring-up was requested on a session that is already live.
    #[error("session already initialised")]
    AlreadyInitialized,

    /// The render node could not be opened read-write.
    #[error("could not open GPU direct rendering infrastructure {path}: {source}")]
    DevicePath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not create GBM context: {0}")]
    AllocContext(PlatformError),

    #[error("could not get platform display: {0}")]
    PlatformDisplay(PlatformError),

    #[error("could not initialise EGL: {0}")]
    DisplayInit(PlatformError),

    /// A required display extension is missing (or the list could not be queried).
    #[error("could not locate extension: {0}")]
    MissingExtension(&'static str),

    #[error("could not choose EGL configuration: {0}")]
    Config(PlatformError),

    #[error("could not bind EGL_OPENGL_ES_API: {0}")]
    BindApi(PlatformError),

    #[error("could not create EGL context: {0}")]
    CreateContext(PlatformError),

    #[error("could not make current EGL context: {0}")]
    MakeCurrent(PlatformError),
}

/// Name of the context-creation extension checked during bring-up.
pub const EXT_CREATE_CONTEXT: &str = "EGL_KHR_create_context";
/// Name of the surfaceless-context extension checked during bring-up.
pub const EXT_SURFACELESS_CONTEXT: &str = "EGL_KHR_surfaceless_context";

impl BringUpError {
    /// Stable numeric code of this failure.
    pub fn code(&self) -> i32 {
        match self {
            BringUpError::AlreadyInitialized => -101,
            BringUpError::DevicePath { .. } => -102,
            BringUpError::AllocContext(_) => -103,
            BringUpError::PlatformDisplay(_) => -104,
            BringUpError::DisplayInit(_) => -105,
            BringUpError::MissingExtension(EXT_SURFACELESS_CONTEXT) => -107,
            BringUpError::MissingExtension(_) => -106,
            BringUpError::Config(_) => -108,
            BringUpError::BindApi(_) => -109,
            BringUpError::CreateContext(_) => -110,
            BringUpError::MakeCurrent(_) => -111,
        }
    }
}

/// Human-readable description of a session-level code.
pub fn describe_code(code: i32) -> &'static str {
    match code {
        CODE_NO_ERROR => "no error",
        CODE_GROUP_INIT => "error during session bring-up",
        -101 => "already initialised",
        -102 => "could not open GPU direct rendering infrastructure",
        -103 => "could not create GBM context",
        -104 => "could not get platform display",
        -105 => "could not initialise EGL",
        -106 => "could not locate extension: EGL_KHR_create_context",
        -107 => "could not locate extension: EGL_KHR_surfaceless_context",
        -108 => "could not choose EGL configuration",
        -109 => "could not bind EGL_OPENGL_ES_API",
        -110 => "could not create EGL context",
        -111 => "could not make current EGL context",
        CODE_GROUP_GL_ERROR => "error in the GL library, see the diagnostic queue",
        _ => "undefined error",
    }
}

/// Failure of a resource, transfer or dispatch operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComputeError {
    /// The driver raised error indicators while `op` ran.
    #[error("{op}: {count} GL error(s) raised")]
    Gl { op: &'static str, count: u32 },

    /// Kernel compilation failed; the compile log went to the diagnostic queue.
    #[error("shader compilation failed ({count} error(s))")]
    Compile { count: u32 },

    /// Program link failed; the link log went to the diagnostic queue.
    #[error("program link failed ({count} error(s))")]
    Link { count: u32 },

    #[error("byte length mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("binding slot of '{0}' is unresolved")]
    UnresolvedBinding(String),

    #[error("resource '{0}' not found in program")]
    BindingNotFound(String),

    #[error("'{0}' is not initialised on the device")]
    NotInitialized(String),

    #[error("patch [{x_min}, {x_max}) x [{y_min}, {y_max}) outside {width}x{height} image")]
    PatchOutOfBounds {
        x_min: u32,
        x_max: u32,
        y_min: u32,
        y_max: u32,
        width: u32,
        height: u32,
    },

    #[error("no image-unit format for {components} x {element}")]
    UnsupportedFormat {
        element: &'static str,
        components: u8,
    },

    #[error("local work-group size must be >= 1 on every axis, got {x}x{y}x{z}")]
    InvalidLocalSize { x: u32, y: u32, z: u32 },

    #[error("no GLSL scalar type for {0}")]
    NoGlslType(&'static str),

    #[error("uniform '{name}' has type 0x{actual:04X}, data does not match")]
    UniformTypeMismatch { name: String, actual: u32 },

    #[error("session is not live")]
    NotLive,

    /// A GL entry point needed by the operation could not be resolved.
    #[error("driver does not provide {0}")]
    Unsupported(&'static str),
}

impl ComputeError {
    /// Number of driver error indicators carried by this error (0 for contract violations).
    pub fn error_count(&self) -> u32 {
        match self {
            ComputeError::Gl { count, .. }
            | ComputeError::Compile { count }
            | ComputeError::Link { count } => *count,
            _ => 0,
        }
    }

    /// Adds `extra` drained indicators to a driver error. Contract violations pass through.
    pub fn with_extra_errors(self, extra: u32) -> Self {
        match self {
            ComputeError::Gl { op, count } => ComputeError::Gl {
                op,
                count: count + extra,
            },
            ComputeError::Compile { count } => ComputeError::Compile {
                count: count + extra,
            },
            ComputeError::Link { count } => ComputeError::Link {
                count: count + extra,
            },
            other => other,
        }
    }
}

/// Diagnostic queue failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Fixed-capacity queue is at capacity.
    #[error("queue is full (capacity {0})")]
    Full(usize),

    /// Backing store could not be reallocated.
    #[error("could not reallocate queue storage to {0} slots")]
    Alloc(usize),
}

/// Unified error type for gles-compute operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Bring-up error ({code}): {0}", code = .0.code())]
    BringUp(#[from] BringUpError),

    #[error("Compute error: {0}")]
    Compute(#[from] ComputeError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bring_up_codes() {
        assert_eq!(BringUpError::AlreadyInitialized.code(), -101);
        assert_eq!(
            BringUpError::AllocContext(PlatformError::new("no gbm")).code(),
            -103
        );
        assert_eq!(BringUpError::MissingExtension(EXT_CREATE_CONTEXT).code(), -106);
        assert_eq!(
            BringUpError::MissingExtension(EXT_SURFACELESS_CONTEXT).code(),
            -107
        );
        assert_eq!(
            BringUpError::MakeCurrent(PlatformError::new("lost")).code(),
            -111
        );
    }

    #[test]
    fn test_device_path_display() {
        let err = BringUpError::DevicePath {
            path: PathBuf::from("/dev/dri/nope"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(err.code(), -102);
        assert!(err.to_string().contains("/dev/dri/nope"));
    }

    #[test]
    fn test_describe_code_covers_every_variant() {
        let errors = [
            BringUpError::AlreadyInitialized,
            BringUpError::AllocContext(PlatformError::new("x")),
            BringUpError::PlatformDisplay(PlatformError::new("x")),
            BringUpError::DisplayInit(PlatformError::new("x")),
            BringUpError::MissingExtension(EXT_CREATE_CONTEXT),
            BringUpError::MissingExtension(EXT_SURFACELESS_CONTEXT),
            BringUpError::Config(PlatformError::new("x")),
            BringUpError::BindApi(PlatformError::new("x")),
            BringUpError::CreateContext(PlatformError::new("x")),
            BringUpError::MakeCurrent(PlatformError::new("x")),
        ];
        for err in &errors {
            assert_ne!(describe_code(err.code()), "undefined error", "{err}");
        }
        assert_eq!(describe_code(CODE_NO_ERROR), "no error");
        assert!(describe_code(CODE_GROUP_GL_ERROR).contains("diagnostic queue"));
        assert_eq!(describe_code(-42), "undefined error");
    }

    #[test]
    fn test_compute_error_count() {
        assert_eq!(ComputeError::Gl { op: "dispatch", count: 3 }.error_count(), 3);
        assert_eq!(ComputeError::Compile { count: 2 }.error_count(), 2);
        assert_eq!(ComputeError::NotLive.error_count(), 0);
        assert_eq!(
            ComputeError::SizeMismatch {
                expected: 16,
                actual: 12
            }
            .error_count(),
            0
        );
    }

    #[test]
    fn test_with_extra_errors() {
        let gl = ComputeError::Gl { op: "destroy image", count: 1 };
        assert_eq!(gl.with_extra_errors(2).error_count(), 3);
        assert_eq!(
            ComputeError::Link { count: 1 }.with_extra_errors(1),
            ComputeError::Link { count: 2 }
        );
        assert_eq!(ComputeError::NotLive.with_extra_errors(4), ComputeError::NotLive);
    }

    #[test]
    fn test_size_mismatch_display() {
        let err = ComputeError::SizeMismatch {
            expected: 64,
            actual: 60,
        };
        let msg = err.to_string();
        assert!(msg.contains("64"));
        assert!(msg.contains("60"));
    }

    #[test]
    fn test_unified_error_from() {
        let err: Error = BringUpError::AlreadyInitialized.into();
        assert!(matches!(err, Error::BringUp(_)));
        assert_eq!(
            err.to_string(),
            "Bring-up error (-101): session already initialised"
        );

        let err: Error = QueueError::Full(16).into();
        assert!(matches!(err, Error::Queue(QueueError::Full(16))));
    }
}
