//! Named uniforms resolved once and written repeatedly.

use super::binding::uniform_index;
use super::context::DeviceContext;
use super::program::Program;
use crate::error::ComputeError;
use glow::HasContext;

/// Host data for a uniform write, flattened in column-major order for matrices.
#[derive(Debug, Clone, Copy)]
pub enum UniformData<'a> {
    Float(&'a [f32]),
    Int(&'a [i32]),
    Uint(&'a [u32]),
}

impl UniformData<'_> {
    fn len(&self) -> usize {
        match self {
            UniformData::Float(v) => v.len(),
            UniformData::Int(v) => v.len(),
            UniformData::Uint(v) => v.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    Float,
    Int,
    Uint,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Vector(usize),
    /// Columns, rows.
    Matrix(usize, usize),
}

impl Shape {
    fn components(self) -> usize {
        match self {
            Shape::Vector(n) => n,
            Shape::Matrix(cols, rows) => cols * rows,
        }
    }
}

/// Scalar kind and shape of a supported uniform type.
fn layout_of(utype: u32) -> Option<(Scalar, Shape)> {
    let layout = match utype {
        glow::FLOAT => (Scalar::Float, Shape::Vector(1)),
        glow::FLOAT_VEC2 => (Scalar::Float, Shape::Vector(2)),
        glow::FLOAT_VEC3 => (Scalar::Float, Shape::Vector(3)),
        glow::FLOAT_VEC4 => (Scalar::Float, Shape::Vector(4)),
        glow::INT => (Scalar::Int, Shape::Vector(1)),
        glow::INT_VEC2 => (Scalar::Int, Shape::Vector(2)),
        glow::INT_VEC3 => (Scalar::Int, Shape::Vector(3)),
        glow::INT_VEC4 => (Scalar::Int, Shape::Vector(4)),
        glow::UNSIGNED_INT => (Scalar::Uint, Shape::Vector(1)),
        glow::UNSIGNED_INT_VEC2 => (Scalar::Uint, Shape::Vector(2)),
        glow::UNSIGNED_INT_VEC3 => (Scalar::Uint, Shape::Vector(3)),
        glow::UNSIGNED_INT_VEC4 => (Scalar::Uint, Shape::Vector(4)),
        glow::BOOL => (Scalar::Bool, Shape::Vector(1)),
        glow::FLOAT_MAT2 => (Scalar::Float, Shape::Matrix(2, 2)),
        glow::FLOAT_MAT3 => (Scalar::Float, Shape::Matrix(3, 3)),
        glow::FLOAT_MAT4 => (Scalar::Float, Shape::Matrix(4, 4)),
        glow::FLOAT_MAT2x3 => (Scalar::Float, Shape::Matrix(2, 3)),
        glow::FLOAT_MAT2x4 => (Scalar::Float, Shape::Matrix(2, 4)),
        glow::FLOAT_MAT3x2 => (Scalar::Float, Shape::Matrix(3, 2)),
        glow::FLOAT_MAT3x4 => (Scalar::Float, Shape::Matrix(3, 4)),
        glow::FLOAT_MAT4x2 => (Scalar::Float, Shape::Matrix(4, 2)),
        glow::FLOAT_MAT4x3 => (Scalar::Float, Shape::Matrix(4, 3)),
        _ => return None,
    };
    Some(layout)
}

/// An active uniform of a linked program.
#[derive(Debug, Clone)]
pub struct Uniform {
    name: String,
    location: Option<glow::UniformLocation>,
    index: Option<u32>,
    size: i32,
    utype: u32,
}

impl Uniform {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: None,
            index: None,
            size: 0,
            utype: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active-uniform index, once resolved.
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    /// Array length reported by the program.
    pub fn size(&self) -> i32 {
        self.size
    }

    /// GL type enum reported by the program.
    pub fn utype(&self) -> u32 {
        self.utype
    }

    pub fn is_resolved(&self) -> bool {
        self.location.is_some()
    }

    /// Looks up index, location, size and type in `program`.
    pub fn init(&mut self, ctx: &DeviceContext, program: &Program) -> Result<(), ComputeError> {
        let handle = program
            .handle()
            .ok_or_else(|| ComputeError::NotInitialized("program".to_string()))?;
        let gl = ctx.gl();
        let index = uniform_index(gl, handle, &self.name)
            .ok_or_else(|| ComputeError::BindingNotFound(self.name.clone()))?;
        // SAFETY: `handle` is a linked program of the current context.
        let (active, location) = unsafe {
            (
                gl.get_active_uniform(handle, index),
                gl.get_uniform_location(handle, &self.name),
            )
        };
        let active = active.ok_or_else(|| ComputeError::BindingNotFound(self.name.clone()))?;
        let location = location.ok_or_else(|| ComputeError::BindingNotFound(self.name.clone()))?;

        self.index = Some(index);
        self.size = active.size;
        self.utype = active.utype;
        self.location = Some(location);
        ctx.check("init uniform")
    }

    /// Checks `data` against the declared type and array length.
    fn check_data(&self, data: &UniformData<'_>) -> Result<(), ComputeError> {
        let mismatch = || ComputeError::UniformTypeMismatch {
            name: self.name.clone(),
            actual: self.utype,
        };
        let (scalar, shape) = layout_of(self.utype).ok_or_else(mismatch)?;
        let kind_ok = matches!(
            (scalar, data),
            (Scalar::Float, UniformData::Float(_))
                | (Scalar::Int, UniformData::Int(_))
                | (Scalar::Uint, UniformData::Uint(_))
                | (Scalar::Bool, UniformData::Int(_) | UniformData::Uint(_))
        );
        if !kind_ok {
            return Err(mismatch());
        }
        let expected = shape.components() * self.size.max(1) as usize;
        if data.len() != expected {
            return Err(ComputeError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(())
    }

    /// Writes `data` to the uniform in `program`.
    pub fn write(
        &self,
        ctx: &DeviceContext,
        program: &Program,
        data: UniformData<'_>,
    ) -> Result<(), ComputeError> {
        let handle = program
            .handle()
            .ok_or_else(|| ComputeError::NotInitialized("program".to_string()))?;
        let location = self
            .location
            .as_ref()
            .ok_or_else(|| ComputeError::NotInitialized(self.name.clone()))?;
        self.check_data(&data)?;
        let (_, shape) = layout_of(self.utype).ok_or_else(|| ComputeError::UniformTypeMismatch {
            name: self.name.clone(),
            actual: self.utype,
        })?;

        let gl = ctx.gl();
        let loc = Some(location);
        // SAFETY: data length matches the declared type, checked above.
        unsafe {
            gl.use_program(Some(handle));
            match (data, shape) {
                (UniformData::Float(v), Shape::Vector(1)) => gl.uniform_1_f32_slice(loc, v),
                (UniformData::Float(v), Shape::Vector(2)) => gl.uniform_2_f32_slice(loc, v),
                (UniformData::Float(v), Shape::Vector(3)) => gl.uniform_3_f32_slice(loc, v),
                (UniformData::Float(v), Shape::Vector(_)) => gl.uniform_4_f32_slice(loc, v),
                (UniformData::Float(v), Shape::Matrix(cols, rows)) => match (cols, rows) {
                    (2, 2) => gl.uniform_matrix_2_f32_slice(loc, false, v),
                    (3, 3) => gl.uniform_matrix_3_f32_slice(loc, false, v),
                    (2, 3) => gl.uniform_matrix_2x3_f32_slice(loc, false, v),
                    (2, 4) => gl.uniform_matrix_2x4_f32_slice(loc, false, v),
                    (3, 2) => gl.uniform_matrix_3x2_f32_slice(loc, false, v),
                    (3, 4) => gl.uniform_matrix_3x4_f32_slice(loc, false, v),
                    (4, 2) => gl.uniform_matrix_4x2_f32_slice(loc, false, v),
                    (4, 3) => gl.uniform_matrix_4x3_f32_slice(loc, false, v),
                    _ => gl.uniform_matrix_4_f32_slice(loc, false, v),
                },
                (UniformData::Int(v), Shape::Vector(1)) => gl.uniform_1_i32_slice(loc, v),
                (UniformData::Int(v), Shape::Vector(2)) => gl.uniform_2_i32_slice(loc, v),
                (UniformData::Int(v), Shape::Vector(3)) => gl.uniform_3_i32_slice(loc, v),
                (UniformData::Int(v), _) => gl.uniform_4_i32_slice(loc, v),
                (UniformData::Uint(v), Shape::Vector(1)) => gl.uniform_1_u32_slice(loc, v),
                (UniformData::Uint(v), Shape::Vector(2)) => gl.uniform_2_u32_slice(loc, v),
                (UniformData::Uint(v), Shape::Vector(3)) => gl.uniform_3_u32_slice(loc, v),
                (UniformData::Uint(v), _) => gl.uniform_4_u32_slice(loc, v),
            }
            gl.use_program(None);
        }
        ctx.check("write uniform")
    }
}
