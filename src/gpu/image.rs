//! 2D images bound to image units, with optional framebuffer read-back.

use super::binding::{Binding, DeviceResource};
use super::context::DeviceContext;
use super::format::{Access, ElementType, Filter, PixelFormat, Wrap};
use super::program::Program;
use crate::error::ComputeError;
use glow::{HasContext, PixelPackData, PixelUnpackData};
use log::debug;

/// Half-open pixel rectangle `[x_min, x_max) x [y_min, y_max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
}

impl Rect {
    pub fn new(x_min: u32, x_max: u32, y_min: u32, y_max: u32) -> Self {
        Self {
            x_min,
            x_max,
            y_min,
            y_max,
        }
    }

    /// The whole of a `width` x `height` image.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, width, 0, height)
    }

    pub fn width(&self) -> u32 {
        self.x_max.saturating_sub(self.x_min)
    }

    pub fn height(&self) -> u32 {
        self.y_max.saturating_sub(self.y_min)
    }

    pub fn area(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x_min && x < self.x_max && y >= self.y_min && y < self.y_max
    }

    /// Fails unless the rectangle is well-formed and inside a `width` x `height` image.
    pub fn check_within(&self, width: u32, height: u32) -> Result<(), ComputeError> {
        if self.x_min <= self.x_max
            && self.y_min <= self.y_max
            && self.x_max <= width
            && self.y_max <= height
        {
            Ok(())
        } else {
            Err(ComputeError::PatchOutOfBounds {
                x_min: self.x_min,
                x_max: self.x_max,
                y_min: self.y_min,
                y_max: self.y_max,
                width,
                height,
            })
        }
    }
}

/// Copies a tightly packed patch into a full-width row-major image buffer.
///
/// Source rows are `rect.width()` pixels long, destination rows `image_width`.
///
/// # Errors
///
/// [`ComputeError::PatchOutOfBounds`] if `rect` is wider than the image,
/// [`ComputeError::SizeMismatch`] if `patch` is not exactly the rectangle or
/// `dest` ends before the rectangle's last row.
pub fn stitch_rows(
    patch: &[u8],
    dest: &mut [u8],
    rect: Rect,
    image_width: u32,
    pixel_size: usize,
) -> Result<(), ComputeError> {
    let stride = image_width as usize * pixel_size;
    rect.check_within(image_width, rect.y_max)?;
    if rect.y_max as usize * stride > dest.len() {
        return Err(ComputeError::SizeMismatch {
            expected: rect.y_max as usize * stride,
            actual: dest.len(),
        });
    }
    let row_len = rect.width() as usize * pixel_size;
    if patch.len() != row_len * rect.height() as usize {
        return Err(ComputeError::SizeMismatch {
            expected: row_len * rect.height() as usize,
            actual: patch.len(),
        });
    }
    if row_len == 0 {
        return Ok(());
    }
    for (row, src) in patch.chunks_exact(row_len).enumerate() {
        let start = (rect.y_min as usize + row) * stride + rect.x_min as usize * pixel_size;
        dest[start..start + row_len].copy_from_slice(src);
    }
    Ok(())
}

/// Repeats one pixel value over `count` pixels.
fn fill_pixels(pixel: &[u8], count: usize) -> Vec<u8> {
    pixel.repeat(count)
}

/// Render target used to read an image back to the host.
#[derive(Debug)]
struct Framebuffer {
    /// Attachment point the texture is bound to, e.g. `GL_COLOR_ATTACHMENT0`.
    attachment: u32,
    handle: glow::Framebuffer,
}

/// A 2D image on the device.
pub struct Image2D {
    /// Kernel-side name and image unit.
    binding: Binding,
    /// Width in pixels.
    width: u32,
    /// Height in pixels.
    height: u32,
    /// Storage, transfer and image-unit formats.
    format: PixelFormat,
    /// How the kernel may touch the image.
    access: Access,
    /// Edge policy for sampled reads.
    wrap: Wrap,
    /// Minification and magnification filter.
    filter: Filter,
    /// Texture object, `None` until `init`.
    texture: Option<glow::Texture>,
    /// Read-back target, only when `init` was given an attachment.
    framebuffer: Option<Framebuffer>,
}

impl Image2D {
    /// Describes a `width` x `height` image of `components` channels of `element`.
    ///
    /// # Errors
    ///
    /// [`ComputeError::UnsupportedFormat`] if `components` is outside `1..=4`.
    pub fn new(
        binding: Binding,
        width: u32,
        height: u32,
        element: ElementType,
        components: u8,
        access: Access,
    ) -> Result<Self, ComputeError> {
        Ok(Self {
            binding,
            width,
            height,
            format: PixelFormat::new(element, components)?,
            access,
            wrap: Wrap::default(),
            filter: Filter::default(),
            texture: None,
            framebuffer: None,
        })
    }

    pub fn with_wrap(mut self, wrap: Wrap) -> Self {
        self.wrap = wrap;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> &PixelFormat {
        &self.format
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn pixel_size(&self) -> usize {
        self.format.pixel_size()
    }

    /// Byte length of the whole image.
    pub fn data_size(&self) -> usize {
        self.pixel_size() * self.width as usize * self.height as usize
    }

    pub fn has_framebuffer(&self) -> bool {
        self.framebuffer.is_some()
    }

    /// Resolves the image unit from `program` if none was supplied.
    pub fn resolve(&mut self, ctx: &DeviceContext, program: &Program) -> Result<u32, ComputeError> {
        self.binding.resolve(ctx, program)
    }

    /// Allocates storage and binds the image to its unit.
    ///
    /// With an `attachment` (e.g. `glow::COLOR_ATTACHMENT0`) a framebuffer is
    /// created so the image can be read back.
    ///
    /// # Errors
    ///
    /// [`ComputeError::UnresolvedBinding`] without a slot,
    /// [`ComputeError::UnsupportedFormat`] for formats no image unit accepts,
    /// [`ComputeError::Gl`] when allocation raised error indicators. Nothing
    /// stays allocated on failure.
    pub fn init(&mut self, ctx: &DeviceContext, attachment: Option<u32>) -> Result<(), ComputeError> {
        let unit = self.binding.require_slot()?;
        let image_format = self.format.require_image_unit()?;
        self.destroy(ctx)?;

        let gl = ctx.gl();
        // SAFETY: the session's context is current on this thread.
        unsafe {
            let texture = gl.create_texture().map_err(|e| {
                debug!("glGenTextures failed: {}", e);
                ComputeError::Gl {
                    op: "create texture",
                    count: ctx.drain_errors() + 1,
                }
            })?;
            self.texture = Some(texture);

            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            let wrap = self.wrap.to_gl() as i32;
            let filter = self.filter.to_gl() as i32;
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, wrap);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, wrap);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, filter);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, filter);
            gl.tex_storage_2d(
                glow::TEXTURE_2D,
                1,
                self.format.internal,
                self.width as i32,
                self.height as i32,
            );
            gl.bind_image_texture(unit, texture, 0, false, 0, self.access.to_gl(), image_format);

            if let Some(attachment) = attachment {
                match gl.create_framebuffer() {
                    Ok(handle) => {
                        self.framebuffer = Some(Framebuffer { attachment, handle });
                        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(handle));
                        gl.framebuffer_texture_2d(
                            glow::FRAMEBUFFER,
                            attachment,
                            glow::TEXTURE_2D,
                            Some(texture),
                            0,
                        );
                    }
                    Err(e) => {
                        debug!("glGenFramebuffers failed: {}", e);
                        self.release(gl);
                        let count = ctx.drain_errors() + 1;
                        return Err(ComputeError::Gl {
                            op: "create framebuffer",
                            count,
                        });
                    }
                }
            }
        }

        if let Err(e) = ctx.check("init image") {
            self.release(ctx.gl());
            return Err(e.with_extra_errors(ctx.drain_errors()));
        }
        debug!(
            "image '{}' {}x{} bound to unit {}",
            self.binding.name(),
            self.width,
            self.height,
            unit
        );
        Ok(())
    }

    fn release(&mut self, gl: &glow::Context) {
        // SAFETY: handles belong to the current context and are dropped here.
        unsafe {
            if let Some(framebuffer) = self.framebuffer.take() {
                gl.delete_framebuffer(framebuffer.handle);
            }
            if let Some(texture) = self.texture.take() {
                gl.delete_texture(texture);
            }
        }
    }

    fn texture(&self) -> Result<glow::Texture, ComputeError> {
        self.texture
            .ok_or_else(|| ComputeError::NotInitialized(self.binding.name().to_string()))
    }

    fn upload(&self, ctx: &DeviceContext, rect: Rect, data: &[u8]) -> Result<(), ComputeError> {
        let texture = self.texture()?;
        let gl = ctx.gl();
        // SAFETY: `data` holds exactly `rect.area()` pixels, checked by the callers.
        unsafe {
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                rect.x_min as i32,
                rect.y_min as i32,
                rect.width() as i32,
                rect.height() as i32,
                self.format.transfer,
                self.format.element.to_gl(),
                PixelUnpackData::Slice(data),
            );
        }
        ctx.check("write image")
    }

    fn expect_len(&self, rect: Rect, actual: usize) -> Result<(), ComputeError> {
        let expected = rect.area() * self.pixel_size();
        if actual == expected {
            Ok(())
        } else {
            Err(ComputeError::SizeMismatch { expected, actual })
        }
    }

    /// Uploads the whole image from tightly packed row-major pixels.
    ///
    /// # Errors
    ///
    /// [`ComputeError::SizeMismatch`] unless `data` is exactly [`data_size`](Self::data_size) bytes.
    pub fn write(&self, ctx: &DeviceContext, data: &[u8]) -> Result<(), ComputeError> {
        let rect = Rect::full(self.width, self.height);
        self.expect_len(rect, data.len())?;
        self.upload(ctx, rect, data)
    }

    /// Uploads a tightly packed patch covering `rect`.
    ///
    /// # Errors
    ///
    /// [`ComputeError::PatchOutOfBounds`] if `rect` leaves the image,
    /// [`ComputeError::SizeMismatch`] unless `data` covers `rect` exactly.
    pub fn write_patch(&self, ctx: &DeviceContext, data: &[u8], rect: Rect) -> Result<(), ComputeError> {
        rect.check_within(self.width, self.height)?;
        self.expect_len(rect, data.len())?;
        if rect.is_empty() {
            return Ok(());
        }
        self.upload(ctx, rect, data)
    }

    /// Fills the whole image with one pixel value.
    pub fn reset(&self, ctx: &DeviceContext, pixel: &[u8]) -> Result<(), ComputeError> {
        self.reset_patch(ctx, pixel, Rect::full(self.width, self.height))
    }

    /// Fills `rect` with one pixel value.
    pub fn reset_patch(&self, ctx: &DeviceContext, pixel: &[u8], rect: Rect) -> Result<(), ComputeError> {
        rect.check_within(self.width, self.height)?;
        if pixel.len() != self.pixel_size() {
            return Err(ComputeError::SizeMismatch {
                expected: self.pixel_size(),
                actual: pixel.len(),
            });
        }
        if rect.is_empty() {
            return Ok(());
        }
        self.upload(ctx, rect, &fill_pixels(pixel, rect.area()))
    }

    /// Reads the whole image back through its framebuffer.
    ///
    /// # Errors
    ///
    /// [`ComputeError::NotInitialized`] when the image has no framebuffer.
    pub fn read(&self, ctx: &DeviceContext, dest: &mut [u8]) -> Result<(), ComputeError> {
        let rect = Rect::full(self.width, self.height);
        self.expect_len(rect, dest.len())?;
        self.read_pixels(ctx, rect, dest, true)
    }

    /// Reads `rect` back into the matching pixels of a full-size `dest`.
    ///
    /// With `render` the texture is re-attached to the framebuffer first.
    /// Pixels of `dest` outside `rect` are left untouched.
    pub fn read_patch(
        &self,
        ctx: &DeviceContext,
        dest: &mut [u8],
        rect: Rect,
        render: bool,
    ) -> Result<(), ComputeError> {
        rect.check_within(self.width, self.height)?;
        self.expect_len(Rect::full(self.width, self.height), dest.len())?;
        if rect.is_empty() {
            return Ok(());
        }
        let mut patch = vec![0u8; rect.area() * self.pixel_size()];
        self.read_pixels(ctx, rect, &mut patch, render)?;
        stitch_rows(&patch, dest, rect, self.width, self.pixel_size())
    }

    fn read_pixels(
        &self,
        ctx: &DeviceContext,
        rect: Rect,
        out: &mut [u8],
        render: bool,
    ) -> Result<(), ComputeError> {
        let texture = self.texture()?;
        let framebuffer = self.framebuffer.as_ref().ok_or_else(|| {
            ComputeError::NotInitialized(format!("framebuffer of '{}'", self.binding.name()))
        })?;
        let gl = ctx.gl();
        // SAFETY: `out` holds exactly `rect.area()` pixels of this image's format.
        unsafe {
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer.handle));
            if render {
                gl.framebuffer_texture_2d(
                    glow::FRAMEBUFFER,
                    framebuffer.attachment,
                    glow::TEXTURE_2D,
                    Some(texture),
                    0,
                );
            }
            gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            gl.read_pixels(
                rect.x_min as i32,
                rect.y_min as i32,
                rect.width() as i32,
                rect.height() as i32,
                self.format.transfer,
                self.format.element.to_gl(),
                PixelPackData::Slice(out),
            );
        }
        ctx.check("read image")
    }
}

impl DeviceResource for Image2D {
    fn name(&self) -> &str {
        self.binding.name()
    }

    fn is_initialized(&self) -> bool {
        self.texture.is_some()
    }

    fn destroy(&mut self, ctx: &DeviceContext) -> Result<(), ComputeError> {
        self.release(ctx.gl());
        ctx.check("destroy image")
    }

    /// e.g. `layout(rgba8ui, binding=0) readonly uniform highp uimage2D input_image`
    fn glsl_layout(&self) -> Result<String, ComputeError> {
        let slot = self.binding.require_slot()?;
        let qualifier = self.format.glsl_format_qualifier()?;
        let access = match self.access.glsl_qualifier() {
            "" => String::new(),
            q => format!("{q} "),
        };
        Ok(format!(
            "layout({}, binding={}) {}uniform highp {} {}",
            qualifier,
            slot,
            access,
            self.format.glsl_image_type(),
            self.binding.name()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::binding::ResourceKind;

    fn rgba8(name: &str, slot: u32, access: Access) -> Image2D {
        Image2D::new(
            Binding::with_slot(name, ResourceKind::Image2D, slot),
            64,
            32,
            ElementType::UnsignedByte,
            4,
            access,
        )
        .unwrap()
    }

    #[test]
    fn test_rect_bounds() {
        assert!(Rect::new(0, 64, 0, 32).check_within(64, 32).is_ok());
        assert!(Rect::new(10, 10, 5, 5).check_within(64, 32).is_ok());
        assert!(matches!(
            Rect::new(0, 65, 0, 32).check_within(64, 32),
            Err(ComputeError::PatchOutOfBounds { x_max: 65, .. })
        ));
        assert!(Rect::new(8, 4, 0, 1).check_within(64, 32).is_err());
    }

    #[test]
    fn test_rect_is_half_open() {
        let rect = Rect::new(2, 4, 1, 3);
        assert_eq!(rect.width(), 2);
        assert_eq!(rect.area(), 4);
        assert!(rect.contains(2, 1));
        assert!(!rect.contains(4, 1));
        assert!(!rect.contains(2, 3));
    }

    #[test]
    fn test_stitch_rows() {
        // 4x3 image of 1-byte pixels, 2x2 patch at (1, 1)
        let mut dest = vec![0u8; 12];
        let patch = [1, 2, 3, 4];
        stitch_rows(&patch, &mut dest, Rect::new(1, 3, 1, 3), 4, 1).unwrap();
        assert_eq!(dest, vec![0, 0, 0, 0, 0, 1, 2, 0, 0, 3, 4, 0]);
    }

    #[test]
    fn test_stitch_rows_multibyte() {
        let mut dest = vec![9u8; 2 * 2 * 2];
        stitch_rows(&[1, 1, 2, 2], &mut dest, Rect::new(1, 2, 0, 2), 2, 2).unwrap();
        assert_eq!(dest, vec![9, 9, 1, 1, 9, 9, 2, 2]);
    }

    #[test]
    fn test_stitch_rows_short_destination() {
        // 4-wide image with only two rows of room, patch reaching row 3
        let mut dest = vec![0u8; 8];
        assert_eq!(
            stitch_rows(&[1, 2, 3, 4], &mut dest, Rect::new(0, 2, 1, 3), 4, 1),
            Err(ComputeError::SizeMismatch {
                expected: 12,
                actual: 8
            })
        );
        assert_eq!(dest, vec![0; 8]);
    }

    #[test]
    fn test_stitch_rows_rejects_bad_patch() {
        let mut dest = vec![0u8; 12];
        assert_eq!(
            stitch_rows(&[1, 2, 3], &mut dest, Rect::new(1, 3, 1, 3), 4, 1),
            Err(ComputeError::SizeMismatch {
                expected: 4,
                actual: 3
            })
        );
        assert!(matches!(
            stitch_rows(&[0; 4], &mut dest, Rect::new(3, 5, 0, 2), 4, 1),
            Err(ComputeError::PatchOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_fill_pixels() {
        assert_eq!(fill_pixels(&[1, 2], 3), vec![1, 2, 1, 2, 1, 2]);
    }

    #[test]
    fn test_sizes() {
        let image = rgba8("input", 0, Access::ReadOnly);
        assert_eq!(image.pixel_size(), 4);
        assert_eq!(image.data_size(), 64 * 32 * 4);
        assert!(image.expect_len(Rect::full(64, 32), 64 * 32 * 4).is_ok());
        assert_eq!(
            image.expect_len(Rect::new(0, 2, 0, 2), 15),
            Err(ComputeError::SizeMismatch {
                expected: 16,
                actual: 15
            })
        );
    }

    #[test]
    fn test_glsl_layout() {
        let input = rgba8("input_image", 0, Access::ReadOnly);
        assert_eq!(
            input.glsl_layout().unwrap(),
            "layout(rgba8ui, binding=0) readonly uniform highp uimage2D input_image"
        );

        let output = rgba8("output_image", 1, Access::WriteOnly);
        assert_eq!(
            output.glsl_layout().unwrap(),
            "layout(rgba8ui, binding=1) writeonly uniform highp uimage2D output_image"
        );
    }

    #[test]
    fn test_glsl_layout_needs_slot() {
        let image = Image2D::new(
            Binding::new("img", ResourceKind::Image2D),
            4,
            4,
            ElementType::Float,
            1,
            Access::ReadWrite,
        )
        .unwrap();
        assert!(matches!(
            image.glsl_layout(),
            Err(ComputeError::UnresolvedBinding(_))
        ));
        assert!(!image.is_initialized());
    }
}
