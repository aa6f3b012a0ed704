//! Shader storage and atomic counter buffers.
//!
//! Both kinds share one implementation; they differ only in the bind target
//! and the declaration they render for kernel source.

use super::binding::{Binding, DeviceResource, ResourceKind};
use super::context::DeviceContext;
use super::format::{BufferUsage, ElementType};
use super::program::Program;
use crate::error::ComputeError;
use bytemuck::Pod;
use glow::HasContext;
use log::debug;
use std::marker::PhantomData;

/// Bind target and declaration format of a buffer kind.
pub trait BufferKind {
    const TARGET: u32;
    const RESOURCE: ResourceKind;

    /// Declaration text for a buffer named `name` at `slot`.
    fn glsl_layout(name: &str, slot: u32, element: ElementType) -> Result<String, ComputeError>;
}

/// `GL_SHADER_STORAGE_BUFFER`
#[derive(Debug)]
pub struct ShaderStorage;

/// `GL_ATOMIC_COUNTER_BUFFER`
#[derive(Debug)]
pub struct AtomicCounter;

impl BufferKind for ShaderStorage {
    const TARGET: u32 = glow::SHADER_STORAGE_BUFFER;
    const RESOURCE: ResourceKind = ResourceKind::ShaderStorage;

    fn glsl_layout(name: &str, slot: u32, element: ElementType) -> Result<String, ComputeError> {
        Ok(format!(
            "layout(std430, binding={}) buffer {} {{ {} {}_data[]; }}",
            slot,
            name,
            element.glsl_scalar()?,
            name
        ))
    }
}

impl BufferKind for AtomicCounter {
    const TARGET: u32 = glow::ATOMIC_COUNTER_BUFFER;
    const RESOURCE: ResourceKind = ResourceKind::AtomicCounter;

    fn glsl_layout(name: &str, slot: u32, _element: ElementType) -> Result<String, ComputeError> {
        Ok(format!("layout(binding={slot}, offset=0) uniform atomic_uint {name}"))
    }
}

pub type ShaderStorageBuffer = Buffer<ShaderStorage>;
pub type AtomicCounterBuffer = Buffer<AtomicCounter>;

/// A linear device buffer of `len` elements of one base type.
pub struct Buffer<K: BufferKind> {
    /// Kernel-side name and binding point.
    binding: Binding,
    /// Base type of every element.
    element: ElementType,
    /// Usage hint passed on each (re)allocation.
    usage: BufferUsage,
    /// Elements currently allocated on the device.
    len: usize,
    /// Buffer object, `None` until `init`.
    handle: Option<glow::Buffer>,
    _kind: PhantomData<K>,
}

impl<K: BufferKind> Buffer<K> {
    /// A buffer whose slot is looked up in the program on first use.
    pub fn new(name: impl Into<String>, element: ElementType) -> Self {
        Self::from_binding(Binding::new(name, K::RESOURCE), element)
    }

    /// A buffer with a caller-supplied slot.
    pub fn with_slot(name: impl Into<String>, element: ElementType, slot: u32) -> Self {
        Self::from_binding(Binding::with_slot(name, K::RESOURCE, slot), element)
    }

    fn from_binding(binding: Binding, element: ElementType) -> Self {
        Self {
            binding,
            element,
            usage: BufferUsage::default(),
            len: 0,
            handle: None,
            _kind: PhantomData,
        }
    }

    pub fn with_usage(mut self, usage: BufferUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn element(&self) -> ElementType {
        self.element
    }

    /// Element count currently allocated.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte size currently allocated.
    pub fn byte_len(&self) -> usize {
        self.element.byte_len(self.len)
    }

    /// Resolves the binding slot from `program` if none was supplied.
    pub fn resolve(&mut self, ctx: &DeviceContext, program: &Program) -> Result<u32, ComputeError> {
        self.binding.resolve(ctx, program)
    }

    /// Allocates the buffer with `len` zeroed elements.
    ///
    /// # Errors
    ///
    /// [`ComputeError::UnresolvedBinding`] without a slot, [`ComputeError::Gl`]
    /// when allocation raised error indicators. Nothing stays allocated on failure.
    pub fn init(&mut self, ctx: &DeviceContext, len: usize) -> Result<(), ComputeError> {
        let zeros = vec![0u8; self.element.byte_len(len)];
        self.init_bytes(ctx, &zeros)
    }

    /// Allocates the buffer seeded with `data`.
    pub fn init_with<T: Pod>(&mut self, ctx: &DeviceContext, data: &[T]) -> Result<(), ComputeError> {
        self.init_bytes(ctx, bytemuck::cast_slice(data))
    }

    fn init_bytes(&mut self, ctx: &DeviceContext, bytes: &[u8]) -> Result<(), ComputeError> {
        self.binding.require_slot()?;
        self.destroy(ctx)?;

        // SAFETY: the session's context is current on this thread.
        let handle = unsafe { ctx.gl().create_buffer() }.map_err(|e| {
            debug!("glGenBuffers failed: {}", e);
            ComputeError::Gl {
                op: "create buffer",
                count: ctx.drain_errors() + 1,
            }
        })?;
        self.handle = Some(handle);

        if let Err(e) = self.write_bytes(ctx, bytes) {
            self.release(ctx.gl());
            return Err(e.with_extra_errors(ctx.drain_errors()));
        }
        Ok(())
    }

    fn release(&mut self, gl: &glow::Context) {
        if let Some(handle) = self.handle.take() {
            // SAFETY: `handle` belongs to the current context and is dropped here.
            unsafe { gl.delete_buffer(handle) };
        }
        self.len = 0;
    }

    fn elements_in(&self, byte_len: usize) -> Result<usize, ComputeError> {
        let size = self.element.size();
        if byte_len % size != 0 {
            return Err(ComputeError::SizeMismatch {
                expected: byte_len - byte_len % size,
                actual: byte_len,
            });
        }
        Ok(byte_len / size)
    }

    fn handle(&self) -> Result<glow::Buffer, ComputeError> {
        self.handle
            .ok_or_else(|| ComputeError::NotInitialized(self.binding.name().to_string()))
    }

    /// Replaces the contents, reallocating to fit `data`, and binds the buffer to its slot.
    ///
    /// # Errors
    ///
    /// [`ComputeError::NotInitialized`] before `init`, [`ComputeError::SizeMismatch`]
    /// if `data` is not a whole number of elements.
    pub fn write<T: Pod>(&mut self, ctx: &DeviceContext, data: &[T]) -> Result<(), ComputeError> {
        self.write_bytes(ctx, bytemuck::cast_slice(data))
    }

    fn write_bytes(&mut self, ctx: &DeviceContext, bytes: &[u8]) -> Result<(), ComputeError> {
        let handle = self.handle()?;
        let slot = self.binding.require_slot()?;
        let len = self.elements_in(bytes.len())?;
        let gl = ctx.gl();
        // SAFETY: `handle` belongs to the current context.
        unsafe {
            gl.bind_buffer(K::TARGET, Some(handle));
            gl.buffer_data_u8_slice(K::TARGET, bytes, self.usage.to_gl());
            gl.bind_buffer_base(K::TARGET, slot, Some(handle));
        }
        ctx.check("write buffer")?;
        self.len = len;
        Ok(())
    }

    /// Overwrites elements starting at `offset` without reallocating.
    ///
    /// # Errors
    ///
    /// [`ComputeError::SizeMismatch`] if the range runs past [`len`](Self::len).
    pub fn write_range<T: Pod>(
        &self,
        ctx: &DeviceContext,
        offset: usize,
        data: &[T],
    ) -> Result<(), ComputeError> {
        let handle = self.handle()?;
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let count = self.elements_in(bytes.len())?;
        if offset + count > self.len {
            return Err(ComputeError::SizeMismatch {
                expected: self.element.byte_len(self.len.saturating_sub(offset)),
                actual: bytes.len(),
            });
        }
        let gl = ctx.gl();
        // SAFETY: the range was checked against the allocated size.
        unsafe {
            gl.bind_buffer(K::TARGET, Some(handle));
            gl.buffer_sub_data_u8_slice(K::TARGET, self.element.byte_len(offset) as i32, bytes);
        }
        ctx.check("write buffer range")
    }

    /// Copies the leading elements of the buffer into `out` by mapping it.
    ///
    /// # Errors
    ///
    /// [`ComputeError::SizeMismatch`] if `out` is larger than the buffer,
    /// [`ComputeError::Gl`] if mapping fails.
    pub fn read<T: Pod>(&self, ctx: &DeviceContext, out: &mut [T]) -> Result<(), ComputeError> {
        let handle = self.handle()?;
        let out: &mut [u8] = bytemuck::cast_slice_mut(out);
        self.elements_in(out.len())?;
        if out.len() > self.byte_len() {
            return Err(ComputeError::SizeMismatch {
                expected: self.byte_len(),
                actual: out.len(),
            });
        }
        if out.is_empty() {
            return Ok(());
        }

        let gl = ctx.gl();
        // SAFETY: the mapped range is `out.len()` bytes and is unmapped before returning.
        unsafe {
            gl.bind_buffer(K::TARGET, Some(handle));
            let mapped = gl.map_buffer_range(K::TARGET, 0, out.len() as i32, glow::MAP_READ_BIT);
            if mapped.is_null() {
                return Err(ComputeError::Gl {
                    op: "map buffer",
                    count: ctx.drain_errors() + 1,
                });
            }
            std::ptr::copy_nonoverlapping(mapped, out.as_mut_ptr(), out.len());
            gl.unmap_buffer(K::TARGET);
        }
        ctx.check("read buffer")
    }
}

impl AtomicCounterBuffer {
    /// Sets the buffer to a single counter value.
    pub fn write_u32(&mut self, ctx: &DeviceContext, value: u32) -> Result<(), ComputeError> {
        self.write(ctx, &[value])
    }

    /// Reads the first counter value.
    pub fn read_u32(&self, ctx: &DeviceContext) -> Result<u32, ComputeError> {
        let mut value = [0u32];
        self.read(ctx, &mut value)?;
        Ok(value[0])
    }
}

impl<K: BufferKind> DeviceResource for Buffer<K> {
    fn name(&self) -> &str {
        self.binding.name()
    }

    fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    fn destroy(&mut self, ctx: &DeviceContext) -> Result<(), ComputeError> {
        self.release(ctx.gl());
        ctx.check("destroy buffer")
    }

    fn glsl_layout(&self) -> Result<String, ComputeError> {
        K::glsl_layout(self.binding.name(), self.binding.require_slot()?, self.element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssbo_glsl_layout() {
        let ssbo = ShaderStorageBuffer::with_slot("kernel_ssbo", ElementType::Float, 2);
        assert_eq!(
            ssbo.glsl_layout().unwrap(),
            "layout(std430, binding=2) buffer kernel_ssbo { float kernel_ssbo_data[]; }"
        );
    }

    #[test]
    fn test_ssbo_layout_without_glsl_type() {
        let ssbo = ShaderStorageBuffer::with_slot("packed", ElementType::UnsignedShort, 0);
        assert_eq!(
            ssbo.glsl_layout(),
            Err(ComputeError::NoGlslType("GL_UNSIGNED_SHORT"))
        );
    }

    #[test]
    fn test_acbo_glsl_layout() {
        let acbo = AtomicCounterBuffer::with_slot("hits", ElementType::UnsignedInt, 1);
        assert_eq!(
            acbo.glsl_layout().unwrap(),
            "layout(binding=1, offset=0) uniform atomic_uint hits"
        );
    }

    #[test]
    fn test_element_count_from_bytes() {
        let ssbo = ShaderStorageBuffer::new("data", ElementType::Float);
        assert_eq!(ssbo.elements_in(36), Ok(9));
        assert_eq!(
            ssbo.elements_in(10),
            Err(ComputeError::SizeMismatch {
                expected: 8,
                actual: 10
            })
        );
    }

    #[test]
    fn test_new_buffer_is_empty() {
        let ssbo = ShaderStorageBuffer::new("data", ElementType::Int).with_usage(BufferUsage::StaticRead);
        assert!(ssbo.is_empty());
        assert_eq!(ssbo.byte_len(), 0);
        assert!(!ssbo.is_initialized());
        assert_eq!(ssbo.binding().kind(), ResourceKind::ShaderStorage);
        assert!(matches!(
            ssbo.glsl_layout(),
            Err(ComputeError::UnresolvedBinding(_))
        ));
    }
}
