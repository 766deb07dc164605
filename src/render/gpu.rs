//! Device raymarcher.
//!
//! Dispatches the `render_scene` and `pre_compute_sdf` entry points of the
//! model-kernel program. The uniform block mirrors the WGSL layout exactly;
//! the precomputed SDF volume rides along as a storage buffer so the kernel
//! can take safe steps, and a single-voxel dummy keeps the binding valid
//! when the feature is off.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::compute::buffer::Buffer;
use crate::compute::context::{ComputeContext, ComputeError};
use crate::compute::program::KernelProgram;
use crate::field::precomp::PreComputedSdf;
use crate::kernel::types::{BoundingBox, RenderingSettings};
use crate::render::camera::Camera;

/// Must match `struct Uniforms` in raymarch.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Uniforms {
    cam_origin: [f32; 3],
    cam_fov_factor: f32,
    cam_forward: [f32; 3],
    cam_aspect: f32,
    cam_right: [f32; 3],
    cam_max_march_dist: f32,
    cam_up: [f32; 3],
    quality: f32,
    precomp_min: [f32; 3],
    approximation: u32,
    precomp_max: [f32; 3],
    precomp_resolution: u32,
    light_dir: [f32; 3],
    z_mm: f32,
    width: u32,
    height: u32,
    start_line: u32,
    end_line: u32,
}

pub struct GpuRaymarcher {
    context: Arc<ComputeContext>,
    uniforms: Buffer<Uniforms>,
    precomp: Buffer<f32>,
    output: Buffer<u32>,
    width: u32,
    height: u32,
    max_march_dist: f32,
}

impl GpuRaymarcher {
    pub fn new(context: Arc<ComputeContext>, width: u32, height: u32) -> Self {
        Self {
            uniforms: Buffer::new(Arc::clone(&context)),
            precomp: Buffer::new(Arc::clone(&context)),
            output: Buffer::new(Arc::clone(&context)),
            context,
            width,
            height,
            max_march_dist: 2000.0,
        }
    }

    pub fn set_max_march_distance(&mut self, distance: f32) {
        self.max_march_dist = distance.max(1.0);
    }

    /// Upload the precomputed SDF volume (or its dummy) to the device.
    pub fn upload_precomp(&mut self, precomp: &PreComputedSdf) -> Result<(), ComputeError> {
        self.precomp.data_mut().clear();
        self.precomp.data_mut().extend_from_slice(precomp.values());
        self.precomp.write()
    }

    /// Dispatch the raymarch over `[start_line, end_line)` and read the
    /// RGBA8 scanlines back. A no-op (empty result) while the program is
    /// not valid.
    pub fn render_lines(
        &mut self,
        program: &mut KernelProgram,
        precomp: &PreComputedSdf,
        settings: &RenderingSettings,
        camera: &Camera,
        start_line: u32,
        end_line: u32,
    ) -> Result<Vec<u8>, ComputeError> {
        if !program.is_valid() {
            return Ok(Vec::new());
        }
        let end_line = end_line.min(self.height);
        if start_line >= end_line {
            return Ok(Vec::new());
        }

        let bbox = precomp.bbox();
        let uniforms = self.build_uniforms(precomp, bbox, settings, camera, start_line, end_line);
        self.uniforms.data_mut().clear();
        self.uniforms.data_mut().push(uniforms);
        self.uniforms.write()?;

        if self.precomp.is_empty() {
            self.upload_precomp(precomp)?;
        }

        let pixel_count = (self.width * self.height) as usize;
        if self.output.len() != pixel_count {
            self.output.data_mut().clear();
            self.output.data_mut().resize(pixel_count, 0);
            self.output.create()?;
        }

        let uniform_buffer = self
            .uniforms
            .device_buffer()
            .ok_or(ComputeError::InvalidContext)?;
        let precomp_buffer = self
            .precomp
            .device_buffer()
            .ok_or(ComputeError::InvalidContext)?;
        let output_buffer = self
            .output
            .device_buffer()
            .ok_or(ComputeError::InvalidContext)?;

        program.run(
            "render_scene",
            (self.width, end_line - start_line, 1),
            (16, 16, 1),
            &[
                (0, uniform_buffer.as_entire_binding()),
                (1, precomp_buffer.as_entire_binding()),
                (2, output_buffer.as_entire_binding()),
            ],
        )?;
        self.context.finish();

        self.output.read()?;
        let mut rgba = Vec::with_capacity((end_line - start_line) as usize * self.width as usize * 4);
        for py in start_line..end_line {
            for px in 0..self.width {
                let packed = self.output.data()[(py * self.width + px) as usize];
                rgba.extend_from_slice(&[
                    (packed & 0xff) as u8,
                    ((packed >> 8) & 0xff) as u8,
                    ((packed >> 16) & 0xff) as u8,
                    ((packed >> 24) & 0xff) as u8,
                ]);
            }
        }
        Ok(rgba)
    }

    /// Fill a precompute volume on the device: dispatches `pre_compute_sdf`
    /// over the cube and reads the scalars back into `target`.
    pub fn precompute_sdf(
        &mut self,
        program: &mut KernelProgram,
        target: &mut PreComputedSdf,
        volume: BoundingBox,
        settings: &RenderingSettings,
    ) -> Result<(), ComputeError> {
        if !program.is_valid() {
            return Ok(());
        }
        let n = target.resolution() as u32;

        let camera = Camera::look_at(Vec3::new(0.0, -1.0, 0.0), Vec3::ZERO, 45.0);
        let uniforms = self.build_uniforms_for_volume(&volume, n, settings, &camera);
        self.uniforms.data_mut().clear();
        self.uniforms.data_mut().push(uniforms);
        self.uniforms.write()?;

        let mut result: Buffer<f32> = Buffer::new(Arc::clone(&self.context));
        result.data_mut().resize((n * n * n) as usize, 0.0);
        result.create()?;

        let uniform_buffer = self
            .uniforms
            .device_buffer()
            .ok_or(ComputeError::InvalidContext)?;
        let result_buffer = result.device_buffer().ok_or(ComputeError::InvalidContext)?;

        program.run(
            "pre_compute_sdf",
            (n, n, n),
            (4, 4, 4),
            &[
                (0, uniform_buffer.as_entire_binding()),
                (3, result_buffer.as_entire_binding()),
            ],
        )?;
        self.context.finish();
        result.read()?;

        target.replace_values(result.data(), volume);
        Ok(())
    }

    fn build_uniforms(
        &self,
        precomp: &PreComputedSdf,
        bbox: &BoundingBox,
        settings: &RenderingSettings,
        camera: &Camera,
        start_line: u32,
        end_line: u32,
    ) -> Uniforms {
        let light_dir = Vec3::new(0.5, 0.3, 0.8).normalize();
        Uniforms {
            cam_origin: camera.origin.into(),
            cam_fov_factor: camera.fov_factor,
            cam_forward: camera.forward.into(),
            cam_aspect: self.width as f32 / self.height as f32,
            cam_right: camera.right.into(),
            cam_max_march_dist: self.max_march_dist,
            cam_up: camera.up.into(),
            quality: settings.quality,
            precomp_min: bbox.min.into(),
            approximation: settings.approximation,
            precomp_max: bbox.max.into(),
            precomp_resolution: precomp.resolution() as u32,
            light_dir: light_dir.into(),
            z_mm: settings.z_mm,
            width: self.width,
            height: self.height,
            start_line,
            end_line,
        }
    }

    fn build_uniforms_for_volume(
        &self,
        volume: &BoundingBox,
        resolution: u32,
        settings: &RenderingSettings,
        camera: &Camera,
    ) -> Uniforms {
        Uniforms {
            precomp_min: volume.min.into(),
            precomp_max: volume.max.into(),
            precomp_resolution: resolution,
            ..self.build_uniforms(
                &PreComputedSdf::disabled(),
                volume,
                settings,
                camera,
                0,
                self.height,
            )
        }
    }
}
