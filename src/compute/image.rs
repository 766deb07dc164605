//! Typed 2D/3D device images.
//!
//! Backed by the storage-buffer machinery of [`Buffer`] so compute kernels
//! address them as flat arrays; the pixel format is inferred from the
//! element type. Allocation and release go through the same context byte
//! accounting as plain buffers.

use std::sync::Arc;

use bytemuck::Pod;

use crate::compute::buffer::Buffer;
use crate::compute::context::{ComputeContext, ComputeError};

/// Pixel formats the kernels understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    Float,
    Float2,
    Float4,
    Int,
    Int2,
    UChar,
    Char4,
    Char,
}

/// Maps element types onto kernel pixel formats.
pub trait ImagePixel: Pod {
    const PIXEL_TYPE: PixelType;
}

impl ImagePixel for f32 {
    const PIXEL_TYPE: PixelType = PixelType::Float;
}
impl ImagePixel for [f32; 2] {
    const PIXEL_TYPE: PixelType = PixelType::Float2;
}
impl ImagePixel for [f32; 4] {
    const PIXEL_TYPE: PixelType = PixelType::Float4;
}
impl ImagePixel for i32 {
    const PIXEL_TYPE: PixelType = PixelType::Int;
}
impl ImagePixel for [i32; 2] {
    const PIXEL_TYPE: PixelType = PixelType::Int2;
}
impl ImagePixel for u8 {
    const PIXEL_TYPE: PixelType = PixelType::UChar;
}
impl ImagePixel for [i8; 4] {
    const PIXEL_TYPE: PixelType = PixelType::Char4;
}
impl ImagePixel for i8 {
    const PIXEL_TYPE: PixelType = PixelType::Char;
}

pub struct Image2d<T: ImagePixel> {
    width: usize,
    height: usize,
    buffer: Buffer<T>,
}

impl<T: ImagePixel> Image2d<T> {
    pub fn new(context: Arc<ComputeContext>, width: usize, height: usize) -> Self {
        let mut buffer = Buffer::new(context);
        buffer.data_mut().resize(width * height, T::zeroed());
        Self {
            width,
            height,
            buffer,
        }
    }

    pub fn pixel_type(&self) -> PixelType {
        T::PIXEL_TYPE
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn allocate_on_device(&mut self) -> Result<(), ComputeError> {
        self.buffer.create()
    }

    pub fn write(&mut self) -> Result<(), ComputeError> {
        self.buffer.write()
    }

    pub fn read(&mut self) -> Result<(), ComputeError> {
        self.buffer.read()
    }

    pub fn pixel(&self, x: usize, y: usize) -> T {
        self.buffer.data()[y * self.width + x]
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, value: T) {
        let w = self.width;
        self.buffer.data_mut()[y * w + x] = value;
    }

    pub fn data(&self) -> &[T] {
        self.buffer.data()
    }

    pub fn data_mut(&mut self) -> &mut Vec<T> {
        self.buffer.data_mut()
    }

    pub fn device_buffer(&self) -> Option<&wgpu::Buffer> {
        self.buffer.device_buffer()
    }

    /// Resize the host image; the device block follows on the next write.
    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.buffer.data_mut().clear();
        self.buffer.data_mut().resize(width * height, T::zeroed());
    }
}

pub struct Image3d<T: ImagePixel> {
    width: usize,
    height: usize,
    depth: usize,
    buffer: Buffer<T>,
}

impl<T: ImagePixel> Image3d<T> {
    pub fn new(context: Arc<ComputeContext>, width: usize, height: usize, depth: usize) -> Self {
        let mut buffer = Buffer::new(context);
        buffer.data_mut().resize(width * height * depth, T::zeroed());
        Self {
            width,
            height,
            depth,
            buffer,
        }
    }

    pub fn pixel_type(&self) -> PixelType {
        T::PIXEL_TYPE
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn allocate_on_device(&mut self) -> Result<(), ComputeError> {
        self.buffer.create()
    }

    pub fn write(&mut self) -> Result<(), ComputeError> {
        self.buffer.write()
    }

    pub fn read(&mut self) -> Result<(), ComputeError> {
        self.buffer.read()
    }

    pub fn voxel(&self, x: usize, y: usize, z: usize) -> T {
        self.buffer.data()[(z * self.height + y) * self.width + x]
    }

    pub fn set_voxel(&mut self, x: usize, y: usize, z: usize, value: T) {
        let (w, h) = (self.width, self.height);
        self.buffer.data_mut()[(z * h + y) * w + x] = value;
    }

    pub fn data(&self) -> &[T] {
        self.buffer.data()
    }

    pub fn data_mut(&mut self) -> &mut Vec<T> {
        self.buffer.data_mut()
    }

    pub fn device_buffer(&self) -> Option<&wgpu::Buffer> {
        self.buffer.device_buffer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Option<Arc<ComputeContext>> {
        ComputeContext::new().ok()
    }

    #[test]
    fn pixel_type_is_inferred_from_element() {
        let Some(ctx) = context() else { return };
        let image: Image2d<[f32; 4]> = Image2d::new(Arc::clone(&ctx), 4, 4);
        assert_eq!(image.pixel_type(), PixelType::Float4);
        let image: Image2d<u8> = Image2d::new(Arc::clone(&ctx), 4, 4);
        assert_eq!(image.pixel_type(), PixelType::UChar);
        let image: Image3d<f32> = Image3d::new(ctx, 2, 2, 2);
        assert_eq!(image.pixel_type(), PixelType::Float);
    }

    #[test]
    fn image2d_addressing() {
        let Some(ctx) = context() else { return };
        let mut image: Image2d<f32> = Image2d::new(ctx, 8, 4);
        image.set_pixel(3, 2, 7.5);
        assert_eq!(image.pixel(3, 2), 7.5);
        assert_eq!(image.data().len(), 32);
    }

    #[test]
    fn image3d_round_trip() {
        let Some(ctx) = context() else { return };
        let mut image: Image3d<f32> = Image3d::new(Arc::clone(&ctx), 4, 4, 4);
        image.set_voxel(1, 2, 3, -2.5);
        image.write().unwrap();
        image.data_mut().fill(0.0);
        image.read().unwrap();
        assert_eq!(image.voxel(1, 2, 3), -2.5);
    }

    #[test]
    fn allocation_updates_byte_accounting() {
        let Some(ctx) = context() else { return };
        let baseline = ctx.bytes_allocated();
        let mut image: Image2d<[f32; 4]> = Image2d::new(Arc::clone(&ctx), 16, 16);
        image.allocate_on_device().unwrap();
        assert_eq!(ctx.bytes_allocated(), baseline + 16 * 16 * 16);
        drop(image);
        assert_eq!(ctx.bytes_allocated(), baseline);
    }
}
