//! The `ComputeCore` coordinator.
//!
//! Owns the model kernel, the resource context, the slicer and (when a
//! device is attached) the slicer/renderer program pair. All dispatch paths
//! go through the compute token: a scoped guard over the whole pipeline
//! that precludes concurrent program swaps, buffer resizes and resource
//! mutation.

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use crate::compute::context::ComputeContext;
use crate::compute::program::KernelProgram;
use crate::compute::resource_context::ResourceContext;
use crate::field::bbox::{determine_bbox, BboxError};
use crate::field::sdf::Sdf;
use crate::kernel::types::BoundingBox;
use crate::slice::contour::PolyLine;
use crate::slice::pyramid::ClippingArea;
use crate::slice::slicer::{SliceError, Slicer};

/// Padding around the model bounding box when deriving the clipping area.
const CLIP_PADDING_MM: f32 = 10.0;
/// Iterations for bounding-box discovery.
const BBOX_ITERATIONS: u32 = 10;

pub type SharedModel = Arc<dyn Sdf + Send + Sync>;

/// Front/back program pair: rebuilds land in the back slot and are swapped
/// to the front once valid, after the queue finished.
pub struct ProgramSlot {
    front: KernelProgram,
    back: KernelProgram,
    swap_pending: bool,
}

impl ProgramSlot {
    fn new(context: &Arc<ComputeContext>) -> Result<Self, crate::compute::ComputeError> {
        // The self-contained helpers compile once as the library; the entry
        // points join each rebuild together with the model fragment (they
        // reference model_sdf, which only the fragment defines).
        let mut front = KernelProgram::new(Arc::clone(context));
        front.load_and_compile_lib(&["sdf_lib.wgsl"])?;
        let mut back = KernelProgram::new(Arc::clone(context));
        back.load_and_compile_lib(&["sdf_lib.wgsl"])?;
        Ok(Self {
            front,
            back,
            swap_pending: false,
        })
    }

    pub fn front(&mut self) -> &mut KernelProgram {
        &mut self.front
    }

    /// Kick off a background rebuild of the back program with a new model
    /// fragment.
    pub fn recompile(&mut self, model_fragment: String) {
        let entries = crate::compute::program::kernel_source("raymarch.wgsl")
            .expect("raymarch entries are embedded");
        let dynamic = format!("{model_fragment}\n{entries}");
        self.back.build_with_lib_non_blocking(dynamic, None);
        self.swap_pending = true;
    }

    /// Swap front/back once the rebuild completed. The queue is finished
    /// first so outputs of the old program stay readable.
    pub fn swap_if_needed(&mut self, context: &ComputeContext) {
        if self.swap_pending && !self.back.is_compilation_in_progress() {
            self.back.finish_compilation();
            if self.back.is_valid() {
                context.finish();
                std::mem::swap(&mut self.front, &mut self.back);
            }
            self.swap_pending = false;
        }
    }

    pub fn is_compilation_in_progress(&self) -> bool {
        self.front.is_compilation_in_progress() || self.back.is_compilation_in_progress()
    }
}

/// GPU program pair; present only when a compute context is attached.
pub struct ProgramManager {
    context: Arc<ComputeContext>,
    slicer_program: ProgramSlot,
    render_program: ProgramSlot,
}

impl ProgramManager {
    pub fn new(context: Arc<ComputeContext>) -> Result<Self, crate::compute::ComputeError> {
        let slicer_program = ProgramSlot::new(&context)?;
        let render_program = ProgramSlot::new(&context)?;
        Ok(Self {
            context,
            slicer_program,
            render_program,
        })
    }

    pub fn context(&self) -> &Arc<ComputeContext> {
        &self.context
    }

    pub fn slicer_program(&mut self) -> &mut ProgramSlot {
        &mut self.slicer_program
    }

    pub fn render_program(&mut self) -> &mut ProgramSlot {
        &mut self.render_program
    }

    pub fn recompile(&mut self, model_fragment: &str) {
        self.slicer_program.recompile(model_fragment.to_string());
        self.render_program.recompile(model_fragment.to_string());
    }

    pub fn swap_programs_if_needed(&mut self) {
        self.slicer_program.swap_if_needed(&self.context);
        self.render_program.swap_if_needed(&self.context);
    }

    pub fn is_any_compilation_in_progress(&self) -> bool {
        self.slicer_program.is_compilation_in_progress()
            || self.render_program.is_compilation_in_progress()
    }
}

pub struct ComputeCore {
    model: SharedModel,
    resources: ResourceContext,
    slicer: Slicer,
    programs: Option<ProgramManager>,

    bounding_box: Option<BoundingBox>,
    bbox_partial: bool,
    slice_height_mm: f32,
    layer_thickness_mm: f32,
    contour: Vec<PolyLine>,
}

impl ComputeCore {
    pub fn new(model: SharedModel) -> Self {
        Self {
            model,
            resources: ResourceContext::new(),
            slicer: Slicer::new(),
            programs: None,
            bounding_box: None,
            bbox_partial: false,
            slice_height_mm: 0.0,
            layer_thickness_mm: 0.1,
            contour: Vec::new(),
        }
    }

    /// Attach a device; builds the slicer/renderer program pair.
    pub fn attach_compute_context(
        &mut self,
        context: Arc<ComputeContext>,
    ) -> Result<(), crate::compute::ComputeError> {
        self.programs = Some(ProgramManager::new(context)?);
        Ok(())
    }

    pub fn programs_mut(&mut self) -> Option<&mut ProgramManager> {
        self.programs.as_mut()
    }

    pub fn model(&self) -> &SharedModel {
        &self.model
    }

    /// Swap the model; invalidates the cached bounding box, contours and
    /// the precomputed volume.
    pub fn set_model(&mut self, model: SharedModel) {
        self.model = model;
        self.bounding_box = None;
        self.bbox_partial = false;
        self.contour.clear();
        self.resources.release_pre_computed_sdf();
    }

    pub fn resources(&self) -> &ResourceContext {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceContext {
        &mut self.resources
    }

    pub fn slicer(&self) -> &Slicer {
        &self.slicer
    }

    // ── Bounding box ──

    pub fn bounding_box(&self) -> Option<&BoundingBox> {
        self.bounding_box.as_ref()
    }

    pub fn is_bbox_partial(&self) -> bool {
        self.bbox_partial
    }

    /// Discover the model bounding box and derive the clipping area from
    /// it. Returns false when discovery failed entirely.
    pub fn update_bbox(&mut self) -> bool {
        match determine_bbox(self.model.as_ref(), BBOX_ITERATIONS) {
            Ok(result) => {
                self.bounding_box = Some(result.bounds);
                self.bbox_partial = result.partial;
                self.update_clipping_area();
                true
            }
            Err(BboxError::BoundingBoxUnavailable) => {
                log::warn!("bounding box discovery failed; keeping previous box");
                false
            }
        }
    }

    pub fn update_bbox_or_throw(&mut self) -> Result<(), BboxError> {
        if self.update_bbox() {
            Ok(())
        } else {
            Err(BboxError::BoundingBoxUnavailable)
        }
    }

    fn update_clipping_area(&mut self) {
        let Some(bbox) = self.bounding_box else { return };
        let area = ClippingArea::new(
            glam::Vec2::new(bbox.min.x, bbox.min.y),
            glam::Vec2::new(bbox.max.x, bbox.max.y),
        );
        let padded = area.dilated(CLIP_PADDING_MM);
        if padded.is_valid() {
            let _ = self.slicer.set_clipping_area(padded);
            self.resources.set_clipping_area(area, CLIP_PADDING_MM);
        }
    }

    // ── Slice height ──

    pub fn slice_height(&self) -> f32 {
        self.slice_height_mm
    }

    pub fn set_slice_height(&mut self, z_mm: f32) {
        self.slice_height_mm = z_mm;
        self.resources.rendering_settings_mut().z_mm = z_mm;
    }

    pub fn layer_thickness(&self) -> f32 {
        self.layer_thickness_mm
    }

    pub fn set_layer_thickness(&mut self, thickness_mm: f32) {
        self.layer_thickness_mm = thickness_mm.max(f32::EPSILON);
    }

    /// Index of the current slice within the layer stack.
    pub fn layer_number(&self) -> i32 {
        (self.slice_height_mm as f64 / self.layer_thickness_mm as f64).round() as i32
    }

    // ── Contours ──

    /// Re-slice at the current height and cache the contours.
    pub fn request_contour_update(&mut self) -> Result<(), SliceError> {
        self.contour = self.slicer.contours(self.model.as_ref(), self.slice_height_mm)?;
        Ok(())
    }

    pub fn contour(&self) -> &[PolyLine] {
        &self.contour
    }

    // ── Precomputed SDF ──

    /// Fill the precompute volume over the whole build platform.
    pub fn precompute_sdf_for_whole_build_platform(&mut self) {
        let volume = self.resources.build_volume();
        if !self.resources.pre_comp_sdf().is_enabled() {
            self.resources.allocate_default_pre_computed_sdf();
        }
        let model = Arc::clone(&self.model);
        self.resources
            .pre_comp_sdf_mut()
            .compute(model.as_ref(), volume);
        self.resources.set_pre_comp_sdf_bbox(volume);
    }
}

/// Scoped possession of the compute pipeline.
pub struct ComputeToken<'a>(MutexGuard<'a, ComputeCore>);

impl std::ops::Deref for ComputeToken<'_> {
    type Target = ComputeCore;
    fn deref(&self) -> &ComputeCore {
        &self.0
    }
}

impl std::ops::DerefMut for ComputeToken<'_> {
    fn deref_mut(&mut self) -> &mut ComputeCore {
        &mut self.0
    }
}

/// Thread-shared wrapper handing out compute tokens. All GPU dispatches,
/// program swaps and resource mutations require a held token; re-entrant
/// call chains pass the token down instead of re-locking.
pub struct SharedComputeCore {
    inner: Mutex<ComputeCore>,
}

impl SharedComputeCore {
    pub fn new(core: ComputeCore) -> Self {
        Self {
            inner: Mutex::new(core),
        }
    }

    /// Block until the pipeline is free.
    pub fn wait_for_compute_token(&self) -> ComputeToken<'_> {
        ComputeToken(self.inner.lock().expect("compute core poisoned"))
    }

    /// Non-blocking acquisition; `None` when the pipeline is busy.
    pub fn request_compute_token(&self) -> Option<ComputeToken<'_>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(ComputeToken(guard)),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(_)) => panic!("compute core poisoned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::sdf::sphere;

    fn core() -> ComputeCore {
        ComputeCore::new(Arc::new(sphere(12.34)))
    }

    #[test]
    fn update_bbox_discovers_the_sphere() {
        let mut core = core();
        assert!(core.bounding_box().is_none());
        assert!(core.update_bbox());
        let bbox = core.bounding_box().unwrap();
        assert!((bbox.size().x - 24.68).abs() < 1e-3);
        assert!(!core.is_bbox_partial());
        // Clipping area follows the box with padding.
        let clip = core.slicer().clipping_area();
        assert!((clip.min.x - (-12.34 - 10.0)).abs() < 1e-2);
    }

    #[test]
    fn layer_number_follows_slice_height() {
        let mut core = core();
        core.set_layer_thickness(0.1);
        core.set_slice_height(1.0);
        assert_eq!(core.layer_number(), 10);
        core.set_slice_height(0.25);
        assert_eq!(core.layer_number(), 2);
    }

    #[test]
    fn layer_thickness_never_reaches_zero() {
        let mut core = core();
        core.set_layer_thickness(0.0);
        assert!(core.layer_thickness() > 0.0);
    }

    #[test]
    fn contour_update_caches_polylines() {
        let mut core = core();
        core.update_bbox();
        core.set_slice_height(0.0);
        core.request_contour_update().unwrap();
        assert_eq!(core.contour().len(), 1);
    }

    #[test]
    fn set_model_invalidates_caches() {
        let mut core = core();
        core.update_bbox();
        core.precompute_sdf_for_whole_build_platform();
        assert!(core.resources().pre_comp_sdf().is_enabled());

        core.set_model(Arc::new(sphere(1.0)));
        assert!(core.bounding_box().is_none());
        assert!(!core.resources().pre_comp_sdf().is_enabled());
    }

    #[test]
    fn precompute_fills_the_build_volume() {
        let mut core = core();
        core.precompute_sdf_for_whole_build_platform();
        let precomp = core.resources().pre_comp_sdf();
        assert_eq!(precomp.voxel_count(), 128 * 128 * 128);
        assert_eq!(*precomp.bbox(), core.resources().build_volume());
    }

    #[test]
    fn token_excludes_concurrent_holders() {
        let shared = SharedComputeCore::new(core());
        let token = shared.wait_for_compute_token();
        assert!(shared.request_compute_token().is_none());
        drop(token);
        assert!(shared.request_compute_token().is_some());
    }
}
