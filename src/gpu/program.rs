//! Compute programs: compile, link, dispatch.

use super::context::DeviceContext;
use super::interface::{GET_PROGRAM_INTERFACE, GET_PROGRAM_RESOURCE_NAME};
use crate::diagnostics::Source;
use crate::error::ComputeError;
use glow::HasContext;
use log::{debug, warn};

/// Local work-group size declared by a kernel. Every axis is at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSize {
    x: u32,
    y: u32,
    z: u32,
}

impl LocalSize {
    pub fn new(x: u32, y: u32, z: u32) -> Result<Self, ComputeError> {
        if x == 0 || y == 0 || z == 0 {
            return Err(ComputeError::InvalidLocalSize { x, y, z });
        }
        Ok(Self { x, y, z })
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn z(&self) -> u32 {
        self.z
    }

    /// Invocations per work group.
    pub fn invocations(&self) -> u64 {
        u64::from(self.x) * u64::from(self.y) * u64::from(self.z)
    }

    /// Work-group counts covering `global` invocations, `ceil(global / local)` per axis.
    ///
    /// Sizes that do not divide evenly leave extra invocations past the edge;
    /// kernels must bounds-check them.
    pub fn work_groups(&self, global: [u32; 3]) -> [u32; 3] {
        [
            global[0].div_ceil(self.x),
            global[1].div_ceil(self.y),
            global[2].div_ceil(self.z),
        ]
    }

    /// Whether `global` is a whole multiple of this size on every axis.
    pub fn divides(&self, global: [u32; 3]) -> bool {
        global[0] % self.x == 0 && global[1] % self.y == 0 && global[2] % self.z == 0
    }

    /// Local-size declaration for kernel source, without the trailing `;`.
    pub fn glsl_layout(&self) -> String {
        format!(
            "layout (local_size_x = {}, local_size_y = {}, local_size_z = {}) in",
            self.x, self.y, self.z
        )
    }
}

impl Default for LocalSize {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

/// Active uniform reported by a linked program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformInfo {
    /// Declared name; arrays report as `name[0]`.
    pub name: String,
    /// GL type enum, e.g. `GL_FLOAT_VEC4`.
    pub utype: u32,
    /// Array length, 1 for non-arrays.
    pub size: i32,
    /// `None` for uniforms without a location (atomic counters, block members).
    pub location: Option<u32>,
    /// Active atomic counter buffer holding this counter, `None` for other uniforms.
    pub atomic_buffer_index: Option<u32>,
}

/// Active shader storage block reported by a linked program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageBlockInfo {
    /// Block name as declared in the kernel.
    pub name: String,
    /// Active resource index of the block.
    pub index: u32,
    /// Buffer binding point the block reads from.
    pub binding: u32,
}

/// Non-negative program-resource property, `None` for GL's `-1` sentinel.
fn resource_value(props: &[i32]) -> Option<u32> {
    props.first().and_then(|&v| u32::try_from(v).ok())
}

/// A compute kernel and its linked program.
pub struct Program {
    /// Complete kernel source, local-size declaration included.
    source: String,
    /// Work-group size the source declares.
    local_size: LocalSize,
    /// Compiled kernel object, kept until `destroy`.
    shader: Option<glow::Shader>,
    /// Linked program object.
    program: Option<glow::Program>,
}

impl Program {
    pub fn new(source: impl Into<String>, local_size: LocalSize) -> Self {
        Self {
            source: source.into(),
            local_size,
            shader: None,
            program: None,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn local_size(&self) -> LocalSize {
        self.local_size
    }

    /// Linked program handle, if initialised.
    pub fn handle(&self) -> Option<glow::Program> {
        self.program
    }

    pub fn is_initialized(&self) -> bool {
        self.program.is_some()
    }

    pub fn glsl_layout(&self) -> String {
        self.local_size.glsl_layout()
    }

    /// Compiles and links the kernel.
    ///
    /// Compile and link logs are queued line by line as high-severity
    /// diagnostics. A failed step leaves nothing allocated.
    ///
    /// # Errors
    ///
    /// [`ComputeError::Compile`] or [`ComputeError::Link`] when the driver
    /// rejects the kernel, [`ComputeError::Gl`] for any other raised error.
    pub fn init(&mut self, ctx: &DeviceContext) -> Result<(), ComputeError> {
        self.destroy(ctx)?;
        let gl = ctx.gl();

        // SAFETY: the session's context is current on this thread.
        unsafe {
            let shader = gl.create_shader(glow::COMPUTE_SHADER).map_err(|e| {
                warn!("glCreateShader failed: {}", e);
                ComputeError::Gl {
                    op: "create shader",
                    count: ctx.drain_errors() + 1,
                }
            })?;
            self.shader = Some(shader);

            gl.shader_source(shader, &self.source);
            gl.compile_shader(shader);
            if !gl.get_shader_compile_status(shader) {
                let log = gl.get_shader_info_log(shader);
                let lines = ctx.capture_log(Source::ShaderCompiler, &log);
                warn!("kernel compilation failed, {} log line(s) queued", lines);
                self.release(gl);
                return Err(ComputeError::Compile {
                    count: ctx.drain_errors() + 1,
                });
            }

            let program = match gl.create_program() {
                Ok(program) => program,
                Err(e) => {
                    warn!("glCreateProgram failed: {}", e);
                    self.release(gl);
                    return Err(ComputeError::Gl {
                        op: "create program",
                        count: ctx.drain_errors() + 1,
                    });
                }
            };
            self.program = Some(program);

            gl.attach_shader(program, shader);
            gl.link_program(program);
            if !gl.get_program_link_status(program) {
                let log = gl.get_program_info_log(program);
                let lines = ctx.capture_log(Source::Application, &log);
                warn!("program link failed, {} log line(s) queued", lines);
                self.release(gl);
                return Err(ComputeError::Link {
                    count: ctx.drain_errors() + 1,
                });
            }
        }

        if let Err(e) = ctx.check("link program") {
            self.release(ctx.gl());
            return Err(e.with_extra_errors(ctx.drain_errors()));
        }
        debug!("program linked, {}", self.glsl_layout());
        Ok(())
    }

    /// Runs the kernel over `global` invocations and waits on a full memory barrier.
    ///
    /// Returns the work-group counts dispatched.
    ///
    /// # Errors
    ///
    /// [`ComputeError::NotInitialized`] before `init`, [`ComputeError::Gl`]
    /// when the dispatch raised error indicators.
    pub fn dispatch(&self, ctx: &DeviceContext, global: [u32; 3]) -> Result<[u32; 3], ComputeError> {
        let program = self
            .program
            .ok_or_else(|| ComputeError::NotInitialized("program".to_string()))?;
        let groups = self.local_size.work_groups(global);
        if !self.local_size.divides(global) {
            debug!(
                "global size {:?} is not a multiple of local size {}x{}x{}, dispatching {:?} groups",
                global, self.local_size.x, self.local_size.y, self.local_size.z, groups
            );
        }

        let gl = ctx.gl();
        // SAFETY: the session's context is current and `program` is linked.
        unsafe {
            gl.use_program(Some(program));
            gl.dispatch_compute(groups[0], groups[1], groups[2]);
            gl.memory_barrier(glow::ALL_BARRIER_BITS);
            gl.use_program(None);
        }
        ctx.check("dispatch")?;
        Ok(groups)
    }

    /// Active uniforms of the linked program.
    pub fn active_uniforms(&self, ctx: &DeviceContext) -> Result<Vec<UniformInfo>, ComputeError> {
        let program = self
            .program
            .ok_or_else(|| ComputeError::NotInitialized("program".to_string()))?;
        let gl = ctx.gl();
        let mut uniforms = Vec::new();
        // SAFETY: the session's context is current and `program` is linked.
        unsafe {
            for index in 0..gl.get_active_uniforms(program) {
                let Some(active) = gl.get_active_uniform(program, index) else {
                    continue;
                };
                let location = gl
                    .get_uniform_location(program, &active.name)
                    .map(|loc| loc.0);
                let atomic_buffer_index = resource_value(&gl.get_program_resource_i32(
                    program,
                    glow::UNIFORM,
                    index,
                    &[glow::ATOMIC_COUNTER_BUFFER_INDEX],
                ));
                uniforms.push(UniformInfo {
                    name: active.name,
                    utype: active.utype,
                    size: active.size,
                    location,
                    atomic_buffer_index,
                });
            }
        }
        ctx.check("active uniforms")?;
        Ok(uniforms)
    }

    /// Active shader storage blocks of the linked program, in index order.
    ///
    /// # Errors
    ///
    /// [`ComputeError::Unsupported`] when the driver lacks the program-interface
    /// entry points, [`ComputeError::Gl`] when a query raised error indicators.
    pub fn active_storage_blocks(&self, ctx: &DeviceContext) -> Result<Vec<StorageBlockInfo>, ComputeError> {
        let program = self
            .program
            .ok_or_else(|| ComputeError::NotInitialized("program".to_string()))?;
        let queries = ctx.interface();
        let gl = ctx.gl();
        let mut blocks = Vec::new();
        // SAFETY: the session's context is current and `program` is linked.
        unsafe {
            let count = queries
                .active_resources(program, glow::SHADER_STORAGE_BLOCK)
                .ok_or(ComputeError::Unsupported(GET_PROGRAM_INTERFACE))?;
            for index in 0..count {
                let props = gl.get_program_resource_i32(
                    program,
                    glow::SHADER_STORAGE_BLOCK,
                    index,
                    &[glow::NAME_LENGTH, glow::BUFFER_BINDING],
                );
                let name_len = resource_value(&props).unwrap_or(0) as usize;
                let name = queries
                    .resource_name(program, glow::SHADER_STORAGE_BLOCK, index, name_len)
                    .ok_or(ComputeError::Unsupported(GET_PROGRAM_RESOURCE_NAME))?;
                let binding = resource_value(props.get(1..).unwrap_or_default()).unwrap_or(0);
                blocks.push(StorageBlockInfo { name, index, binding });
            }
        }
        ctx.check("active storage blocks")?;
        Ok(blocks)
    }

    /// Deletes the program and kernel objects. Safe to repeat.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Gl`] if the deletes raised error indicators.
    /// The handles are dropped either way.
    pub fn destroy(&mut self, ctx: &DeviceContext) -> Result<(), ComputeError> {
        self.release(ctx.gl());
        ctx.check("destroy program")
    }

    fn release(&mut self, gl: &glow::Context) {
        // SAFETY: handles belong to the current context and are dropped here.
        unsafe {
            if let Some(program) = self.program.take() {
                gl.delete_program(program);
            }
            if let Some(shader) = self.shader.take() {
                gl.delete_shader(shader);
            }
        }
    }
}
