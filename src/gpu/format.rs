//! Element types and pixel formats of device resources.

use crate::error::ComputeError;

/// Base data type of buffer elements and image components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Byte,
    UnsignedByte,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    HalfFloat,
    Float,
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            ElementType::Byte | ElementType::UnsignedByte => 1,
            ElementType::Short | ElementType::UnsignedShort | ElementType::HalfFloat => 2,
            ElementType::Int | ElementType::UnsignedInt | ElementType::Float => 4,
        }
    }

    pub fn to_gl(self) -> u32 {
        match self {
            ElementType::Byte => glow::BYTE,
            ElementType::UnsignedByte => glow::UNSIGNED_BYTE,
            ElementType::Short => glow::SHORT,
            ElementType::UnsignedShort => glow::UNSIGNED_SHORT,
            ElementType::Int => glow::INT,
            ElementType::UnsignedInt => glow::UNSIGNED_INT,
            ElementType::HalfFloat => glow::HALF_FLOAT,
            ElementType::Float => glow::FLOAT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::Byte => "GL_BYTE",
            ElementType::UnsignedByte => "GL_UNSIGNED_BYTE",
            ElementType::Short => "GL_SHORT",
            ElementType::UnsignedShort => "GL_UNSIGNED_SHORT",
            ElementType::Int => "GL_INT",
            ElementType::UnsignedInt => "GL_UNSIGNED_INT",
            ElementType::HalfFloat => "GL_HALF_FLOAT",
            ElementType::Float => "GL_FLOAT",
        }
    }

    /// GLSL scalar type name for storage-buffer declarations.
    pub fn glsl_scalar(self) -> Result<&'static str, ComputeError> {
        match self {
            ElementType::Int => Ok("int"),
            ElementType::UnsignedInt => Ok("uint"),
            ElementType::Float => Ok("float"),
            other => Err(ComputeError::NoGlslType(other.name())),
        }
    }

    /// Byte length of `count` elements.
    pub fn byte_len(self, count: usize) -> usize {
        count * self.size()
    }
}

/// Shader access to an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn to_gl(self) -> u32 {
        match self {
            Access::ReadOnly => glow::READ_ONLY,
            Access::WriteOnly => glow::WRITE_ONLY,
            Access::ReadWrite => glow::READ_WRITE,
        }
    }

    pub fn glsl_qualifier(self) -> &'static str {
        match self {
            Access::ReadOnly => "readonly",
            Access::WriteOnly => "writeonly",
            Access::ReadWrite => "",
        }
    }
}

/// Texture coordinate wrap mode, applied to both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wrap {
    #[default]
    ClampToEdge,
    MirroredRepeat,
    Repeat,
    ClampToBorder,
}

impl Wrap {
    pub fn to_gl(self) -> u32 {
        match self {
            Wrap::ClampToEdge => glow::CLAMP_TO_EDGE,
            Wrap::MirroredRepeat => glow::MIRRORED_REPEAT,
            Wrap::Repeat => glow::REPEAT,
            Wrap::ClampToBorder => glow::CLAMP_TO_BORDER,
        }
    }
}

/// Magnification and minification filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

impl Filter {
    pub fn to_gl(self) -> u32 {
        match self {
            Filter::Nearest => glow::NEAREST,
            Filter::Linear => glow::LINEAR,
        }
    }
}

/// Expected buffer usage pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferUsage {
    StreamDraw,
    StreamRead,
    StreamCopy,
    StaticDraw,
    StaticRead,
    StaticCopy,
    #[default]
    DynamicDraw,
    DynamicRead,
    DynamicCopy,
}

impl BufferUsage {
    pub fn to_gl(self) -> u32 {
        match self {
            BufferUsage::StreamDraw => glow::STREAM_DRAW,
            BufferUsage::StreamRead => glow::STREAM_READ,
            BufferUsage::StreamCopy => glow::STREAM_COPY,
            BufferUsage::StaticDraw => glow::STATIC_DRAW,
            BufferUsage::StaticRead => glow::STATIC_READ,
            BufferUsage::StaticCopy => glow::STATIC_COPY,
            BufferUsage::DynamicDraw => glow::DYNAMIC_DRAW,
            BufferUsage::DynamicRead => glow::DYNAMIC_READ,
            BufferUsage::DynamicCopy => glow::DYNAMIC_COPY,
        }
    }
}

/// Storage, transfer and image-unit formats derived from `(element, components)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub element: ElementType,
    pub components: u8,
    /// Sized internal format used for texture storage.
    pub internal: u32,
    /// Pixel transfer format for uploads and read-back.
    pub transfer: u32,
    /// Format used when binding to an image unit, if the storage format has one.
    pub image_unit: Option<u32>,
}

impl PixelFormat {
    /// Derives the formats for `components` (1..=4) channels of `element`.
    pub fn new(element: ElementType, components: u8) -> Result<Self, ComputeError> {
        let unsupported = ComputeError::UnsupportedFormat {
            element: element.name(),
            components,
        };
        let idx = match components {
            1..=4 => usize::from(components - 1),
            _ => return Err(unsupported),
        };

        let (internal, integer) = match element {
            ElementType::UnsignedByte => (
                [glow::R8UI, glow::RG8UI, glow::RGB8UI, glow::RGBA8UI][idx],
                true,
            ),
            ElementType::Byte => ([glow::R8I, glow::RG8I, glow::RGB8I, glow::RGBA8I][idx], true),
            ElementType::UnsignedShort => (
                [glow::R16UI, glow::RG16UI, glow::RGB16UI, glow::RGBA16UI][idx],
                true,
            ),
            ElementType::Short => (
                [glow::R16I, glow::RG16I, glow::RGB16I, glow::RGBA16I][idx],
                true,
            ),
            ElementType::UnsignedInt => (
                [glow::R32UI, glow::RG32UI, glow::RGB32UI, glow::RGBA32UI][idx],
                true,
            ),
            ElementType::Int => (
                [glow::R32I, glow::RG32I, glow::RGB32I, glow::RGBA32I][idx],
                true,
            ),
            ElementType::HalfFloat => (
                [glow::R16F, glow::RG16F, glow::RGB16F, glow::RGBA16F][idx],
                false,
            ),
            ElementType::Float => (
                [glow::R32F, glow::RG32F, glow::RGB32F, glow::RGBA32F][idx],
                false,
            ),
        };
        let transfer = if integer {
            [glow::RED_INTEGER, glow::RG_INTEGER, glow::RGB_INTEGER, glow::RGBA_INTEGER][idx]
        } else {
            [glow::RED, glow::RG, glow::RGB, glow::RGBA][idx]
        };

        Ok(Self {
            element,
            components,
            internal,
            transfer,
            image_unit: image_unit_format(internal),
        })
    }

    /// Bytes per pixel.
    pub fn pixel_size(&self) -> usize {
        self.element.size() * usize::from(self.components)
    }

    /// Image-unit format, or an error if this storage format cannot be bound.
    pub fn require_image_unit(&self) -> Result<u32, ComputeError> {
        self.image_unit.ok_or(ComputeError::UnsupportedFormat {
            element: self.element.name(),
            components: self.components,
        })
    }

    /// GLSL layout format qualifier, e.g. `rgba8ui`.
    pub fn glsl_format_qualifier(&self) -> Result<&'static str, ComputeError> {
        let qualifier = match self.require_image_unit()? {
            glow::RGBA32F => "rgba32f",
            glow::RGBA16F => "rgba16f",
            glow::R32F => "r32f",
            glow::RGBA32UI => "rgba32ui",
            glow::RGBA16UI => "rgba16ui",
            glow::RGBA8UI => "rgba8ui",
            glow::R32UI => "r32ui",
            glow::RGBA32I => "rgba32i",
            glow::RGBA16I => "rgba16i",
            glow::RGBA8I => "rgba8i",
            _ => "r32i",
        };
        Ok(qualifier)
    }

    /// GLSL image type matching the component kind.
    pub fn glsl_image_type(&self) -> &'static str {
        match self.element {
            ElementType::HalfFloat | ElementType::Float => "image2D",
            ElementType::UnsignedByte | ElementType::UnsignedShort | ElementType::UnsignedInt => {
                "uimage2D"
            }
            ElementType::Byte | ElementType::Short | ElementType::Int => "iimage2D",
        }
    }
}

/// Storage formats usable with image load/store in GLES 3.1.
fn image_unit_format(internal: u32) -> Option<u32> {
    match internal {
        glow::RGBA32F | glow::RGBA16F | glow::R32F | glow::RGBA32UI | glow::RGBA16UI
        | glow::RGBA8UI | glow::R32UI | glow::RGBA32I | glow::RGBA16I | glow::RGBA8I
        | glow::R32I => Some(internal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(ElementType::UnsignedByte.size(), 1);
        assert_eq!(ElementType::HalfFloat.size(), 2);
        assert_eq!(ElementType::Float.size(), 4);
        assert_eq!(ElementType::Float.byte_len(9), 36);
    }

    #[test]
    fn test_glsl_scalar() {
        assert_eq!(ElementType::Float.glsl_scalar(), Ok("float"));
        assert_eq!(ElementType::UnsignedInt.glsl_scalar(), Ok("uint"));
        assert!(matches!(
            ElementType::Short.glsl_scalar(),
            Err(ComputeError::NoGlslType("GL_SHORT"))
        ));
    }

    #[test]
    fn test_rgba8ui_format() {
        let format = PixelFormat::new(ElementType::UnsignedByte, 4).unwrap();
        assert_eq!(format.internal, glow::RGBA8UI);
        assert_eq!(format.transfer, glow::RGBA_INTEGER);
        assert_eq!(format.image_unit, Some(glow::RGBA8UI));
        assert_eq!(format.pixel_size(), 4);
        assert_eq!(format.glsl_format_qualifier(), Ok("rgba8ui"));
        assert_eq!(format.glsl_image_type(), "uimage2D");
    }

    #[test]
    fn test_float_formats() {
        let r32f = PixelFormat::new(ElementType::Float, 1).unwrap();
        assert_eq!(r32f.transfer, glow::RED);
        assert_eq!(r32f.glsl_format_qualifier(), Ok("r32f"));
        assert_eq!(r32f.glsl_image_type(), "image2D");

        let rg16f = PixelFormat::new(ElementType::HalfFloat, 2).unwrap();
        assert_eq!(rg16f.internal, glow::RG16F);
        assert_eq!(rg16f.pixel_size(), 4);
        assert!(rg16f.image_unit.is_none());
    }

    #[test]
    fn test_format_without_image_unit() {
        let rgb8 = PixelFormat::new(ElementType::UnsignedByte, 3).unwrap();
        assert_eq!(rgb8.internal, glow::RGB8UI);
        assert!(matches!(
            rgb8.require_image_unit(),
            Err(ComputeError::UnsupportedFormat { components: 3, .. })
        ));
    }

    #[test]
    fn test_component_range() {
        assert!(PixelFormat::new(ElementType::Float, 0).is_err());
        assert!(PixelFormat::new(ElementType::Float, 5).is_err());
    }

    #[test]
    fn test_access_qualifiers() {
        assert_eq!(Access::ReadOnly.glsl_qualifier(), "readonly");
        assert_eq!(Access::WriteOnly.to_gl(), glow::WRITE_ONLY);
    }
}
