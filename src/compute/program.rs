//! Model-kernel program cache.
//!
//! A program is assembled from embedded library sources plus a dynamically
//! generated model fragment, with a replacement table and feature symbols
//! folded in. Builds are keyed by a 64-bit hash over sources, device name,
//! defines and replacements; an unchanged key skips the build entirely.
//! Pipelines (kernel objects) are created lazily per entry-point name and
//! dropped on the next successful rebuild.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::compute::context::{ComputeContext, ComputeError};

/// Embedded kernel library, keyed by relative path.
const KERNEL_LIBRARY: &[(&str, &str)] = &[
    ("sdf_lib.wgsl", include_str!("kernels/sdf_lib.wgsl")),
    ("raymarch.wgsl", include_str!("kernels/raymarch.wgsl")),
];

/// Embedded kernel source by relative path.
pub fn kernel_source(path: &str) -> Option<&'static str> {
    KERNEL_LIBRARY
        .iter()
        .find(|(name, _)| *name == path)
        .map(|(_, content)| *content)
}

/// Fired when a build finishes; the argument tells whether it succeeded.
pub type BuildCallback = Box<dyn FnOnce(bool) + Send>;

/// Search/replace pairs applied to every source before compilation, e.g.
/// `"// <SMOOTHING KERNEL>" -> user code`.
pub type KernelReplacements = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramState {
    Idle,
    Compiling,
    Valid,
    Invalid,
}

struct SharedModule {
    module: Option<Arc<wgpu::ShaderModule>>,
}

pub struct KernelProgram {
    context: Arc<ComputeContext>,
    /// Library sources in include order, `(path, content)`.
    sources: Vec<(String, String)>,
    dynamic_source: String,
    symbols: BTreeSet<String>,
    additional_define: String,
    replacements: KernelReplacements,

    shared: Arc<Mutex<SharedModule>>,
    valid: Arc<AtomicBool>,
    compiling: Arc<AtomicBool>,
    hash_last_success: Arc<AtomicU64>,
    pipelines_dirty: Arc<AtomicBool>,
    started_once: bool,

    pipelines: HashMap<String, wgpu::ComputePipeline>,
    compile_task: Option<JoinHandle<()>>,
    /// Pre-assembled library block for the build-with-lib mode.
    lib_source: Option<String>,
}

impl KernelProgram {
    pub fn new(context: Arc<ComputeContext>) -> Self {
        Self {
            context,
            sources: Vec::new(),
            dynamic_source: String::new(),
            symbols: BTreeSet::new(),
            additional_define: String::new(),
            replacements: KernelReplacements::new(),
            shared: Arc::new(Mutex::new(SharedModule { module: None })),
            valid: Arc::new(AtomicBool::new(false)),
            compiling: Arc::new(AtomicBool::new(false)),
            hash_last_success: Arc::new(AtomicU64::new(0)),
            pipelines_dirty: Arc::new(AtomicBool::new(false)),
            started_once: false,
            pipelines: HashMap::new(),
            compile_task: None,
            lib_source: None,
        }
    }

    // ── Source assembly ──

    /// Load library sources by relative path from the embedded registry.
    pub fn load_sources(&mut self, paths: &[&str]) -> Result<(), ComputeError> {
        for path in paths {
            let content = kernel_source(path).ok_or_else(|| {
                log::error!("missing kernel source: {path}");
                ComputeError::CompilationFailed(format!("missing kernel source: {path}"))
            })?;
            self.sources.push((path.to_string(), content.to_string()));
        }
        Ok(())
    }

    /// Append the dynamically generated model fragment.
    pub fn set_dynamic_source(&mut self, source: impl Into<String>) {
        self.dynamic_source = source.into();
    }

    pub fn clear_sources(&mut self) {
        self.sources.clear();
        self.dynamic_source.clear();
    }

    pub fn add_symbol(&mut self, symbol: impl Into<String>) {
        self.symbols.insert(symbol.into());
    }

    pub fn remove_symbol(&mut self, symbol: &str) {
        self.symbols.remove(symbol);
    }

    pub fn set_additional_define(&mut self, define: impl Into<String>) {
        self.additional_define = define.into();
    }

    pub fn set_replacements(&mut self, replacements: KernelReplacements) {
        self.replacements = replacements;
    }

    /// Full define string: feature symbols plus the free-form suffix; part
    /// of the cache key and emitted as constants ahead of the sources.
    fn define_string(&self) -> String {
        let mut out = String::new();
        for symbol in &self.symbols {
            out.push_str(" -D ");
            out.push_str(symbol);
        }
        out.push_str(&self.additional_define);
        out
    }

    fn define_header(&self) -> String {
        let mut header = String::new();
        for symbol in &self.symbols {
            header.push_str(&format!("const {symbol}: u32 = 1u;\n"));
        }
        header
    }

    /// Concatenate header, library and dynamic fragment, with replacements
    /// applied to every part. The build-with-lib mode substitutes the
    /// pre-assembled library block instead of re-walking the sources.
    fn assemble(&self) -> String {
        let mut assembled = self.define_header();
        match &self.lib_source {
            Some(lib) => {
                assembled.push_str(&apply_replacements(lib, &self.replacements));
                assembled.push('\n');
            }
            None => {
                for (_, content) in &self.sources {
                    assembled.push_str(&apply_replacements(content, &self.replacements));
                    assembled.push('\n');
                }
            }
        }
        assembled.push_str(&apply_replacements(&self.dynamic_source, &self.replacements));
        assembled
    }

    /// Cache key over sources, device name, defines and replacements.
    fn compute_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for (_, content) in &self.sources {
            content.hash(&mut hasher);
        }
        self.dynamic_source.hash(&mut hasher);
        self.context.device_name().hash(&mut hasher);
        self.define_string().hash(&mut hasher);
        for (search, replace) in &self.replacements {
            search.hash(&mut hasher);
            replace.hash(&mut hasher);
        }
        hasher.finish()
    }

    // ── Lifecycle ──

    pub fn state(&self) -> ProgramState {
        if self.compiling.load(Ordering::Acquire) {
            ProgramState::Compiling
        } else if self.valid.load(Ordering::Acquire) {
            ProgramState::Valid
        } else if self.started_once {
            ProgramState::Invalid
        } else {
            ProgramState::Idle
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn is_compilation_in_progress(&self) -> bool {
        self.compiling.load(Ordering::Acquire)
    }

    pub fn invalidate(&mut self) {
        self.valid.store(false, Ordering::Release);
    }

    /// Blocking build. A hash equal to the last successful one skips the
    /// device build; the callback fires either way.
    pub fn compile(&mut self, callback: Option<BuildCallback>) {
        self.started_once = true;
        let hash = self.compute_hash();
        if self.hash_last_success.load(Ordering::Acquire) == hash && hash != 0 {
            log::debug!("kernel program unchanged (hash {hash:#x}); skipping build");
            self.valid.store(true, Ordering::Release);
            if let Some(cb) = callback {
                cb(true);
            }
            return;
        }

        self.valid.store(false, Ordering::Release);
        self.compiling.store(true, Ordering::Release);

        let outcome = build_module(&self.context, &self.assemble());
        self.install_outcome(outcome, hash, callback);
    }

    /// Background build on a worker thread; join with
    /// [`KernelProgram::finish_compilation`].
    pub fn compile_non_blocking(&mut self, callback: Option<BuildCallback>) {
        self.started_once = true;
        let hash = self.compute_hash();
        if self.hash_last_success.load(Ordering::Acquire) == hash && hash != 0 {
            self.valid.store(true, Ordering::Release);
            if let Some(cb) = callback {
                cb(true);
            }
            return;
        }

        self.valid.store(false, Ordering::Release);
        self.compiling.store(true, Ordering::Release);

        let context = Arc::clone(&self.context);
        let source = self.assemble();
        let shared = Arc::clone(&self.shared);
        let valid = Arc::clone(&self.valid);
        let compiling = Arc::clone(&self.compiling);
        let last_hash = Arc::clone(&self.hash_last_success);
        let pipelines_dirty = Arc::clone(&self.pipelines_dirty);

        self.compile_task = Some(std::thread::spawn(move || {
            let outcome = build_module(&context, &source);
            match outcome {
                Ok(module) => {
                    shared.lock().expect("module lock").module = Some(Arc::new(module));
                    last_hash.store(hash, Ordering::Release);
                    pipelines_dirty.store(true, Ordering::Release);
                    valid.store(true, Ordering::Release);
                    compiling.store(false, Ordering::Release);
                    if let Some(cb) = callback {
                        cb(true);
                    }
                }
                Err(err) => {
                    log::error!("{err}");
                    valid.store(false, Ordering::Release);
                    compiling.store(false, Ordering::Release);
                    if let Some(cb) = callback {
                        cb(false);
                    }
                }
            }
        }));
    }

    /// Join an ongoing background build.
    pub fn finish_compilation(&mut self) {
        if let Some(task) = self.compile_task.take() {
            let _ = task.join();
        }
    }

    /// Load library sources and validate them as a standalone module. The
    /// assembled block is cached; later builds only re-assemble the dynamic
    /// fragment against it.
    pub fn load_and_compile_lib(&mut self, paths: &[&str]) -> Result<(), ComputeError> {
        self.sources.clear();
        self.lib_source = None;
        self.load_sources(paths)?;

        let mut lib = String::new();
        for (_, content) in &self.sources {
            lib.push_str(content);
            lib.push('\n');
        }
        // A library without entry points still validates; syntax errors
        // surface here instead of at every rebuild.
        build_module(&self.context, &lib)?;
        self.lib_source = Some(lib);
        Ok(())
    }

    /// Blocking build of the cached library block plus a fresh dynamic
    /// fragment.
    pub fn build_with_lib(
        &mut self,
        dynamic_source: impl Into<String>,
        callback: Option<BuildCallback>,
    ) {
        self.set_dynamic_source(dynamic_source);
        self.compile(callback);
    }

    /// Background form of [`KernelProgram::build_with_lib`].
    pub fn build_with_lib_non_blocking(
        &mut self,
        dynamic_source: impl Into<String>,
        callback: Option<BuildCallback>,
    ) {
        self.set_dynamic_source(dynamic_source);
        self.compile_non_blocking(callback);
    }

    fn install_outcome(
        &mut self,
        outcome: Result<wgpu::ShaderModule, ComputeError>,
        hash: u64,
        callback: Option<BuildCallback>,
    ) {
        self.compiling.store(false, Ordering::Release);
        match outcome {
            Ok(module) => {
                self.shared.lock().expect("module lock").module = Some(Arc::new(module));
                self.hash_last_success.store(hash, Ordering::Release);
                self.pipelines.clear();
                self.valid.store(true, Ordering::Release);
                if let Some(cb) = callback {
                    cb(true);
                }
            }
            Err(err) => {
                log::error!("{err}");
                self.valid.store(false, Ordering::Release);
                if let Some(cb) = callback {
                    cb(false);
                }
            }
        }
    }

    // ── Dispatch ──

    /// Enqueue `entry_point` over `global_size` threads. A no-op while the
    /// program is not valid. Buffers bind in order at `@group(0)`.
    pub fn run(
        &mut self,
        entry_point: &str,
        global_size: (u32, u32, u32),
        workgroup_size: (u32, u32, u32),
        bindings: &[(u32, wgpu::BindingResource)],
    ) -> Result<(), ComputeError> {
        if !self.is_valid() {
            return Ok(());
        }
        if !self.context.is_valid() {
            return Err(ComputeError::InvalidContext);
        }

        if self.pipelines_dirty.swap(false, Ordering::AcqRel) {
            self.pipelines.clear();
        }

        if !self.pipelines.contains_key(entry_point) {
            let module = {
                let shared = self.shared.lock().expect("module lock");
                shared.module.clone()
            };
            let Some(module) = module else {
                return Err(ComputeError::InvalidContext);
            };
            let pipeline =
                self.context
                    .device()
                    .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some(entry_point),
                        layout: None,
                        module: &module,
                        entry_point: Some(entry_point),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        cache: None,
                    });
            self.pipelines.insert(entry_point.to_string(), pipeline);
        }
        let pipeline = &self.pipelines[entry_point];

        let entries: Vec<wgpu::BindGroupEntry> = bindings
            .iter()
            .map(|(binding, resource)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: resource.clone(),
            })
            .collect();
        let bind_group = self
            .context
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(entry_point),
                layout: &pipeline.get_bind_group_layout(0),
                entries: &entries,
            });

        let mut encoder =
            self.context
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some(entry_point),
                });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(entry_point),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                global_size.0.div_ceil(workgroup_size.0),
                global_size.1.div_ceil(workgroup_size.1),
                global_size.2.div_ceil(workgroup_size.2),
            );
        }
        self.context.queue().submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

fn apply_replacements(source: &str, replacements: &KernelReplacements) -> String {
    let mut out = source.to_string();
    for (search, replace) in replacements {
        out = out.replace(search, replace);
    }
    out
}

/// Create the shader module, capturing validation errors via an error
/// scope so a broken model fragment surfaces as `CompilationFailed`.
fn build_module(
    context: &ComputeContext,
    source: &str,
) -> Result<wgpu::ShaderModule, ComputeError> {
    let device = context.device();
    let line_count = source.lines().count();
    log::info!("compiling kernel program with {line_count} lines");

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("isoforge model kernel"),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        return Err(ComputeError::CompilationFailed(error.to_string()));
    }
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL_FRAGMENT: &str = "fn model_sdf(p: vec3<f32>) -> f32 { return length(p) - 5.0; }\n";

    fn make_program() -> Option<KernelProgram> {
        let context = ComputeContext::new().ok()?;
        let mut program = KernelProgram::new(context);
        program.load_sources(&["sdf_lib.wgsl"]).unwrap();
        program.set_dynamic_source(MODEL_FRAGMENT);
        Some(program)
    }

    #[test]
    fn missing_library_source_is_an_error() {
        let Ok(context) = ComputeContext::new() else {
            return;
        };
        let mut program = KernelProgram::new(context);
        assert!(program.load_sources(&["does_not_exist.wgsl"]).is_err());
    }

    #[test]
    fn identical_sources_produce_identical_hash() {
        let Some(program) = make_program() else { return };
        let Some(other) = make_program() else { return };
        assert_eq!(program.compute_hash(), other.compute_hash());
    }

    #[test]
    fn defines_and_replacements_change_the_hash() {
        let Some(mut program) = make_program() else { return };
        let base = program.compute_hash();

        program.add_symbol("ENABLE_LEVEL_SET");
        let with_symbol = program.compute_hash();
        assert_ne!(base, with_symbol);

        program.remove_symbol("ENABLE_LEVEL_SET");
        assert_eq!(program.compute_hash(), base);

        let mut replacements = KernelReplacements::new();
        replacements.insert(
            "// <SMOOTHING KERNEL>".to_string(),
            "fn user_smooth(d: f32) -> f32 { return d; }".to_string(),
        );
        program.set_replacements(replacements);
        assert_ne!(program.compute_hash(), base);
    }

    #[test]
    fn second_compile_with_same_key_is_a_noop() {
        let Some(mut program) = make_program() else { return };
        program.compile(None);
        assert!(program.is_valid());
        let hash = program.hash_last_success.load(Ordering::Acquire);

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        program.compile(Some(Box::new(move |ok| {
            assert!(ok);
            fired_clone.store(true, Ordering::Release);
        })));
        // Still the same successful hash and the callback fired immediately.
        assert_eq!(program.hash_last_success.load(Ordering::Acquire), hash);
        assert!(fired.load(Ordering::Acquire));
        assert_eq!(program.state(), ProgramState::Valid);
    }

    #[test]
    fn broken_fragment_marks_the_program_invalid() {
        let Some(mut program) = make_program() else { return };
        program.set_dynamic_source("fn model_sdf(p: vec3<f32>) -> f32 { return undefined_fn(p); }");
        program.compile(None);
        assert!(!program.is_valid());
        assert_eq!(program.state(), ProgramState::Invalid);
        // Dispatch on an invalid program is a silent no-op.
        program.run("render_scene", (1, 1, 1), (16, 16, 1), &[]).unwrap();
    }

    #[test]
    fn background_compile_joins() {
        let Some(mut program) = make_program() else { return };
        program.compile_non_blocking(None);
        program.finish_compilation();
        assert!(!program.is_compilation_in_progress());
        assert!(program.is_valid());
    }

    #[test]
    fn lib_mode_reuses_the_library_block() {
        let Some(mut program) = make_program() else { return };
        program.load_and_compile_lib(&["sdf_lib.wgsl"]).unwrap();
        program.build_with_lib(MODEL_FRAGMENT, None);
        assert!(program.is_valid());

        // Swapping only the dynamic fragment changes the key and rebuilds.
        let hash = program.hash_last_success.load(Ordering::Acquire);
        program.build_with_lib(
            "fn model_sdf(p: vec3<f32>) -> f32 { return length(p) - 7.0; }\n",
            None,
        );
        assert!(program.is_valid());
        assert_ne!(program.hash_last_success.load(Ordering::Acquire), hash);
    }

    #[test]
    fn replacement_marker_is_substituted() {
        let Some(mut program) = make_program() else { return };
        let mut replacements = KernelReplacements::new();
        replacements.insert(
            "// <SMOOTHING KERNEL>".to_string(),
            "fn user_smooth(d: f32) -> f32 { return d * 0.5; }".to_string(),
        );
        program.set_replacements(replacements);
        let assembled = program.assemble();
        assert!(assembled.contains("user_smooth"));
        assert!(!assembled.contains("// <SMOOTHING KERNEL>"));
    }
}
