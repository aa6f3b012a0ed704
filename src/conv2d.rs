//! 2D convolution built from one program, two images and a kernel buffer.

use crate::error::ComputeError;
use crate::gpu::{
    Access, Binding, BufferUsage, DeviceContext, DeviceResource, ElementType, Image2D, LocalSize,
    Program, ResourceKind, ShaderStorageBuffer,
};
use log::{debug, info};

const TEMPLATE: &str = include_str!("shaders/conv2d.comp");

pub const INPUT_SLOT: u32 = 0;
pub const OUTPUT_SLOT: u32 = 1;
pub const KERNEL_SLOT: u32 = 2;

/// RGBA, one byte per channel.
pub const PIXEL_SIZE: usize = 4;

/// 3x3 sharpening kernel.
pub const SHARPEN: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];

/// Side length of a square kernel with `len` weights.
pub fn kernel_side(len: usize) -> Result<usize, ComputeError> {
    let side = (len as f64).sqrt().round() as usize;
    if side == 0 || side * side != len {
        return Err(ComputeError::SizeMismatch {
            expected: side.max(1) * side.max(1),
            actual: len,
        });
    }
    Ok(side)
}

/// Convolves an RGBA8 image on the host, with the same edge policy as the kernel.
pub fn convolve_reference(input: &[u8], width: u32, height: u32, kernel: &[f32]) -> Result<Vec<u8>, ComputeError> {
    let k = kernel_side(kernel.len())?;
    let expected = width as usize * height as usize * PIXEL_SIZE;
    if input.len() != expected {
        return Err(ComputeError::SizeMismatch {
            expected,
            actual: input.len(),
        });
    }

    let (w, h) = (width as i64, height as i64);
    let half = (k / 2) as i64;
    let mut output = vec![0u8; expected];
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0f32; PIXEL_SIZE];
            for j in 0..k as i64 {
                for i in 0..k as i64 {
                    let sx = (x + i - half).clamp(0, w - 1);
                    let sy = (y + j - half).clamp(0, h - 1);
                    let weight = kernel[(j * k as i64 + i) as usize];
                    let src = ((sy * w + sx) as usize) * PIXEL_SIZE;
                    for (c, a) in acc.iter_mut().enumerate() {
                        *a += weight * f32::from(input[src + c]);
                    }
                }
            }
            let dst = ((y * w + x) as usize) * PIXEL_SIZE;
            for (c, a) in acc.iter().enumerate() {
                output[dst + c] = a.clamp(0.0, 255.0) as u8;
            }
        }
    }
    Ok(output)
}

/// Folds per-part results into one, adding up their error indicators.
fn summed(op: &'static str, results: &[Result<(), ComputeError>]) -> Result<(), ComputeError> {
    let count: u32 = results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .map(ComputeError::error_count)
        .sum();
    match count {
        0 => Ok(()),
        count => Err(ComputeError::Gl { op, count }),
    }
}

/// Convolution program with its input image, output image and kernel buffer.
pub struct Conv2d {
    program: Program,
    input: Image2D,
    output: Image2D,
    kernel: ShaderStorageBuffer,
}

impl Conv2d {
    /// Describes a convolution over `width` x `height` RGBA8 images.
    pub fn new(local_size: LocalSize, width: u32, height: u32) -> Result<Self, ComputeError> {
        let input = Image2D::new(
            Binding::with_slot("input_image2d", ResourceKind::Image2D, INPUT_SLOT),
            width,
            height,
            ElementType::UnsignedByte,
            PIXEL_SIZE as u8,
            Access::ReadOnly,
        )?;
        let output = Image2D::new(
            Binding::with_slot("output_image2d", ResourceKind::Image2D, OUTPUT_SLOT),
            width,
            height,
            ElementType::UnsignedByte,
            PIXEL_SIZE as u8,
            Access::WriteOnly,
        )?;
        let kernel = ShaderStorageBuffer::with_slot("kernel_ssbo", ElementType::Float, KERNEL_SLOT)
            .with_usage(BufferUsage::StaticRead);

        let source = TEMPLATE
            .replace("{local_size}", &local_size.glsl_layout())
            .replace("{input_image}", &input.glsl_layout()?)
            .replace("{output_image}", &output.glsl_layout()?)
            .replace("{kernel_ssbo}", &kernel.glsl_layout()?);

        Ok(Self {
            program: Program::new(source, local_size),
            input,
            output,
            kernel,
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn input(&self) -> &Image2D {
        &self.input
    }

    pub fn output(&self) -> &Image2D {
        &self.output
    }

    pub fn kernel(&self) -> &ShaderStorageBuffer {
        &self.kernel
    }

    pub fn width(&self) -> u32 {
        self.input.width()
    }

    pub fn height(&self) -> u32 {
        self.input.height()
    }

    /// Byte length of one image.
    pub fn image_size(&self) -> usize {
        self.input.data_size()
    }

    /// Builds everything on the device. Any failing stage tears the whole composite down.
    pub fn init(&mut self, ctx: &DeviceContext, kernel: &[f32]) -> Result<(), ComputeError> {
        kernel_side(kernel.len())?;
        self.init_stages(ctx, kernel).map_err(|e| {
            debug!("conv2d init failed: {}", e);
            let extra = self.destroy(ctx).err().map_or(0, |d| d.error_count());
            e.with_extra_errors(extra)
        })
    }

    fn init_stages(&mut self, ctx: &DeviceContext, kernel: &[f32]) -> Result<(), ComputeError> {
        self.program.init(ctx)?;
        self.input.init(ctx, None)?;
        self.output.init(ctx, Some(glow::COLOR_ATTACHMENT0))?;
        self.kernel.init_with(ctx, kernel)?;
        info!(
            "conv2d ready: {}x{} image, {} kernel weights",
            self.width(),
            self.height(),
            kernel.len()
        );
        Ok(())
    }

    /// Replaces the kernel weights.
    pub fn set_kernel(&mut self, ctx: &DeviceContext, kernel: &[f32]) -> Result<(), ComputeError> {
        kernel_side(kernel.len())?;
        self.kernel.write(ctx, kernel)
    }

    /// Uploads the input image.
    pub fn write_input(&self, ctx: &DeviceContext, input: &[u8]) -> Result<(), ComputeError> {
        self.input.write(ctx, input)
    }

    /// Dispatches over the whole image. Returns the work-group counts.
    pub fn dispatch(&self, ctx: &DeviceContext) -> Result<[u32; 3], ComputeError> {
        self.program.dispatch(ctx, [self.width(), self.height(), 1])
    }

    /// Reads the output image back.
    pub fn read_output(&self, ctx: &DeviceContext, output: &mut [u8]) -> Result<(), ComputeError> {
        self.output.read(ctx, output)
    }

    /// Uploads `input`, convolves it and reads the result into `output`.
    pub fn run(&self, ctx: &DeviceContext, input: &[u8], output: &mut [u8]) -> Result<(), ComputeError> {
        self.write_input(ctx, input)?;
        self.dispatch(ctx)?;
        self.read_output(ctx, output)
    }

    /// Releases every part, even when an earlier one reports errors. Safe to repeat.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Gl`] carrying the error indicators summed over all parts.
    pub fn destroy(&mut self, ctx: &DeviceContext) -> Result<(), ComputeError> {
        let results = [
            self.input.destroy(ctx),
            self.output.destroy(ctx),
            self.kernel.destroy(ctx),
            self.program.destroy(ctx),
        ];
        summed("destroy conv2d", &results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_side() {
        assert_eq!(kernel_side(9), Ok(3));
        assert_eq!(kernel_side(25), Ok(5));
        assert!(kernel_side(0).is_err());
        assert!(kernel_side(8).is_err());
    }

    #[test]
    fn test_source_declarations() {
        let conv = Conv2d::new(LocalSize::new(16, 16, 1).unwrap(), 64, 64).unwrap();
        let source = conv.program().source();
        assert!(source.starts_with("#version 310 es"));
        assert!(source.contains("layout (local_size_x = 16, local_size_y = 16, local_size_z = 1) in;"));
        assert!(source.contains(
            "layout(rgba8ui, binding=0) readonly uniform highp uimage2D input_image2d;"
        ));
        assert!(source.contains(
            "layout(rgba8ui, binding=1) writeonly uniform highp uimage2D output_image2d;"
        ));
        assert!(source.contains(
            "layout(std430, binding=2) buffer kernel_ssbo { float kernel_ssbo_data[]; };"
        ));
        assert!(!source.contains("{local_size}"));
        assert_eq!(conv.image_size(), 64 * 64 * 4);
    }

    #[test]
    fn test_identity_reference() {
        let input: Vec<u8> = (0..4 * 4 * 4).map(|v| v as u8).collect();
        let identity = [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let output = convolve_reference(&input, 4, 4, &identity).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_sharpen_flat_image_unchanged() {
        // weights sum to 1 and edges clamp, so a flat image stays flat
        let input = [40u8, 80, 120, 255].repeat(8 * 8);
        let output = convolve_reference(&input, 8, 8, &SHARPEN).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_sharpen_spot() {
        // single bright pixel in a dark 3x3 image
        let mut input = [0u8, 0, 0, 255].repeat(9);
        input[4 * 4] = 100;
        let output = convolve_reference(&input, 3, 3, &SHARPEN).unwrap();
        // centre gains, direct neighbours saturate at zero
        assert_eq!(output[4 * 4], 255);
        assert_eq!(output[4], 0);
        assert_eq!(output[3 * 4 + 3], 255);
    }

    #[test]
    fn test_summed_destroy_results() {
        let clean = [Ok(()), Ok(())];
        assert_eq!(summed("destroy conv2d", &clean), Ok(()));

        let mixed = [
            Ok(()),
            Err(ComputeError::Gl { op: "destroy image", count: 1 }),
            Err(ComputeError::Gl { op: "destroy program", count: 2 }),
        ];
        assert_eq!(
            summed("destroy conv2d", &mixed),
            Err(ComputeError::Gl { op: "destroy conv2d", count: 3 })
        );
    }

    #[test]
    fn test_reference_size_mismatch() {
        assert!(matches!(
            convolve_reference(&[0; 10], 2, 2, &SHARPEN),
            Err(ComputeError::SizeMismatch {
                expected: 16,
                actual: 10
            })
        ));
    }
}
