//! Binding slots shared by images and buffers.
//!
//! A slot is either supplied up front or looked up once in a linked program by
//! the resource's declared name. Once resolved it is never queried again.

use super::context::DeviceContext;
use super::program::Program;
use crate::error::ComputeError;
use glow::HasContext;
use log::debug;

/// Kind of program interface a resource is bound through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Image2D,
    ShaderStorage,
    AtomicCounter,
}

impl ResourceKind {
    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::Image2D => "image",
            ResourceKind::ShaderStorage => "shader storage buffer",
            ResourceKind::AtomicCounter => "atomic counter buffer",
        }
    }
}

/// Declared name and binding slot of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    name: String,
    kind: ResourceKind,
    slot: Option<u32>,
}

impl Binding {
    /// A binding whose slot is looked up in the program on first use.
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            slot: None,
        }
    }

    /// A binding with a caller-supplied slot.
    pub fn with_slot(name: impl Into<String>, kind: ResourceKind, slot: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            slot: Some(slot),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Resolved slot, if any.
    pub fn slot(&self) -> Option<u32> {
        self.slot
    }

    /// Resolved slot, or an error naming the resource.
    pub fn require_slot(&self) -> Result<u32, ComputeError> {
        self.slot
            .ok_or_else(|| ComputeError::UnresolvedBinding(self.name.clone()))
    }

    /// Resolves the slot against a linked program.
    pub fn resolve(&mut self, ctx: &DeviceContext, program: &Program) -> Result<u32, ComputeError> {
        if let Some(slot) = self.slot {
            return Ok(slot);
        }
        let handle = program
            .handle()
            .ok_or_else(|| ComputeError::NotInitialized("program".to_string()))?;
        let slot = self.resolve_with(|name, kind| query_slot(ctx.gl(), handle, kind, name))?;
        ctx.check("resolve binding")?;
        Ok(slot)
    }

    /// Resolves the slot through `query` unless it is already known.
    pub(crate) fn resolve_with<F>(&mut self, query: F) -> Result<u32, ComputeError>
    where
        F: FnOnce(&str, ResourceKind) -> Option<u32>,
    {
        if let Some(slot) = self.slot {
            return Ok(slot);
        }
        let slot = query(&self.name, self.kind)
            .ok_or_else(|| ComputeError::BindingNotFound(self.name.clone()))?;
        debug!("{} '{}' resolved to slot {}", self.kind.name(), self.name, slot);
        self.slot = Some(slot);
        Ok(slot)
    }
}

fn query_slot(
    gl: &glow::Context,
    program: glow::Program,
    kind: ResourceKind,
    name: &str,
) -> Option<u32> {
    // SAFETY: `program` is a linked program of the current context.
    unsafe {
        match kind {
            ResourceKind::Image2D => {
                let location = gl.get_uniform_location(program, name)?;
                let mut unit = [0i32];
                gl.get_uniform_i32(program, &location, &mut unit);
                u32::try_from(unit[0]).ok()
            }
            ResourceKind::ShaderStorage => {
                let block = gl.get_shader_storage_block_index(program, name)?;
                let props = gl.get_program_resource_i32(
                    program,
                    glow::SHADER_STORAGE_BLOCK,
                    block,
                    &[glow::BUFFER_BINDING],
                );
                props.first().and_then(|&b| u32::try_from(b).ok())
            }
            ResourceKind::AtomicCounter => {
                let index = uniform_index(gl, program, name)?;
                let buffer = gl.get_program_resource_i32(
                    program,
                    glow::UNIFORM,
                    index,
                    &[glow::ATOMIC_COUNTER_BUFFER_INDEX],
                );
                let buffer = buffer.first().and_then(|&b| u32::try_from(b).ok())?;
                let props = gl.get_program_resource_i32(
                    program,
                    glow::ATOMIC_COUNTER_BUFFER,
                    buffer,
                    &[glow::BUFFER_BINDING],
                );
                props.first().and_then(|&b| u32::try_from(b).ok())
            }
        }
    }
}

/// Index of the active uniform called `name`; arrays report as `name[0]`.
pub(crate) fn uniform_index(gl: &glow::Context, program: glow::Program, name: &str) -> Option<u32> {
    // SAFETY: `program` is a linked program of the current context.
    unsafe {
        (0..gl.get_active_uniforms(program)).find(|&i| {
            gl.get_active_uniform(program, i)
                .is_some_and(|u| u.name == name || u.name.strip_suffix("[0]") == Some(name))
        })
    }
}

/// Shared lifecycle of every device-side resource.
pub trait DeviceResource {
    /// Declared name used in kernel source.
    fn name(&self) -> &str;

    /// Whether a device handle is currently held.
    fn is_initialized(&self) -> bool;

    /// Releases the device handle and any owned sub-resource. Safe to repeat.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Gl`] with the number of error indicators the
    /// release raised. The handle is dropped either way.
    fn destroy(&mut self, ctx: &DeviceContext) -> Result<(), ComputeError>;

    /// Declaration text for inclusion in kernel source.
    fn glsl_layout(&self) -> Result<String, ComputeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_static_slot_skips_query() {
        let mut binding = Binding::with_slot("input", ResourceKind::Image2D, 3);
        let slot = binding.resolve_with(|_, _| panic!("static slot must not be queried"));
        assert_eq!(slot, Ok(3));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let queries = Cell::new(0);
        let mut binding = Binding::new("kernel_ssbo", ResourceKind::ShaderStorage);
        assert_eq!(binding.slot(), None);

        let first = binding.resolve_with(|name, kind| {
            assert_eq!(name, "kernel_ssbo");
            assert_eq!(kind, ResourceKind::ShaderStorage);
            queries.set(queries.get() + 1);
            Some(2)
        });
        let second = binding.resolve_with(|_, _| {
            queries.set(queries.get() + 1);
            Some(7)
        });

        assert_eq!(first, Ok(2));
        assert_eq!(second, Ok(2));
        assert_eq!(queries.get(), 1);
    }

    #[test]
    fn test_missing_name() {
        let mut binding = Binding::new("counter", ResourceKind::AtomicCounter);
        let err = binding.resolve_with(|_, _| None).unwrap_err();
        assert_eq!(err, ComputeError::BindingNotFound("counter".to_string()));
        // a failed lookup leaves the slot unresolved
        assert!(matches!(
            binding.require_slot(),
            Err(ComputeError::UnresolvedBinding(_))
        ));
    }
}
