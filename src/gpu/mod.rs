//! Device resources scoped to a live session.
//!
//! Programs, images and buffers share one lifecycle: allocate a handle, bind
//! it to a slot declared by the kernel, move data between host and device,
//! release. Every call that touches the driver drains its error indicators
//! and reports them as `ComputeError::Gl`.

pub mod binding;
pub mod buffers;
pub mod context;
pub mod format;
pub mod image;
pub mod interface;
pub mod program;
pub mod uniform;

pub use binding::{Binding, DeviceResource, ResourceKind};
pub use buffers::{AtomicCounterBuffer, Buffer, BufferKind, ShaderStorageBuffer};
pub use context::DeviceContext;
pub use format::{Access, BufferUsage, ElementType, Filter, PixelFormat, Wrap};
pub use image::{stitch_rows, Image2D, Rect};
pub use interface::InterfaceQueries;
pub use program::{LocalSize, Program, StorageBlockInfo, UniformInfo};
pub use uniform::{Uniform, UniformData};
