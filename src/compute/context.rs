//! Owning root of the compute device.
//!
//! One context per engine instance, passed around explicitly as an `Arc`.
//! Every device allocation goes through the byte accounting here; losing
//! the device or failing a kernel build marks the context invalid, and all
//! dispatches refuse to run until it is rebuilt.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeError {
    /// No compute device available or the device was lost.
    DeviceUnavailable,
    /// A buffer or image allocation failed.
    AllocationFailed { bytes: u64 },
    /// Kernel build failed; the build log is attached.
    CompilationFailed(String),
    /// The context was invalidated; reinitialize before dispatching.
    InvalidContext,
}

impl std::fmt::Display for ComputeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeError::DeviceUnavailable => write!(f, "no compute device available"),
            ComputeError::AllocationFailed { bytes } => {
                write!(f, "device allocation of {bytes} bytes failed")
            }
            ComputeError::CompilationFailed(log) => write!(f, "kernel build failed: {log}"),
            ComputeError::InvalidContext => write!(f, "compute context is invalid"),
        }
    }
}

impl std::error::Error for ComputeError {}

pub struct ComputeContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    device_name: String,
    bytes_allocated: AtomicU64,
    valid: AtomicBool,
}

impl ComputeContext {
    /// Acquire the preferred adapter and device. Fails with
    /// [`ComputeError::DeviceUnavailable`] when no adapter answers.
    pub fn new() -> Result<Arc<Self>, ComputeError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(ComputeError::DeviceUnavailable)?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("isoforge compute"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|_| ComputeError::DeviceUnavailable)?;

        let device_name = adapter.get_info().name;
        log::info!("compute context initialised on {device_name:?}");

        Ok(Arc::new(Self {
            device,
            queue,
            device_name,
            bytes_allocated: AtomicU64::new(0),
            valid: AtomicBool::new(true),
        }))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Aggregate device bytes currently allocated through this context.
    pub fn bytes_allocated(&self) -> u64 {
        self.bytes_allocated.load(Ordering::Relaxed)
    }

    pub(crate) fn track_allocation(&self, bytes: u64) {
        self.bytes_allocated.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn track_release(&self, bytes: u64) {
        self.bytes_allocated.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Mark the context unusable; dispatches refuse to run until the owner
    /// rebuilds it.
    pub fn invalidate(&self) {
        if self.valid.swap(false, Ordering::AcqRel) {
            log::error!("compute context invalidated");
        }
    }

    /// Block until all submitted work completed.
    pub fn finish(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}
