//! Typed host/device buffer.
//!
//! Owns a host `Vec<T>` and at most one live device storage block. `write`
//! recreates the block transparently when the host length changed; `read`
//! blocks on queue completion before copying back. Dropping the buffer (or
//! replacing its block) restores the context byte accounting.

use std::sync::Arc;

use bytemuck::Pod;

use crate::compute::context::{ComputeContext, ComputeError};

pub struct Buffer<T: Pod> {
    context: Arc<ComputeContext>,
    data: Vec<T>,
    device_len: usize,
    device_buffer: Option<wgpu::Buffer>,
}

impl<T: Pod> Buffer<T> {
    pub fn new(context: Arc<ComputeContext>) -> Self {
        Self {
            context,
            data: Vec::new(),
            device_len: 0,
            device_buffer: None,
        }
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Vec<T> {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn device_bytes(len: usize) -> u64 {
        (len * std::mem::size_of::<T>()) as u64
    }

    /// Allocate the device block for the current host length. An empty host
    /// vector still gets a one-element block so bindings stay valid.
    pub fn create(&mut self) -> Result<(), ComputeError> {
        if !self.context.is_valid() {
            return Err(ComputeError::InvalidContext);
        }
        if self.data.is_empty() {
            self.data.push(T::zeroed());
        }

        self.release_device_buffer();
        let bytes = Self::device_bytes(self.data.len());
        // Uniform usage rides along so small parameter blocks can bind as
        // var<uniform> without a second buffer type.
        let buffer = self.context.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("isoforge buffer"),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::UNIFORM
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        self.context.track_allocation(bytes);
        self.device_len = self.data.len();
        self.device_buffer = Some(buffer);
        Ok(())
    }

    /// Upload the host data, recreating the device block if the length
    /// changed. Blocks until the copy is flushed.
    pub fn write(&mut self) -> Result<(), ComputeError> {
        if self.data.is_empty() {
            return Ok(());
        }
        if self.device_buffer.is_none() || self.device_len != self.data.len() {
            self.create()?;
        }
        let buffer = self
            .device_buffer
            .as_ref()
            .ok_or(ComputeError::AllocationFailed {
                bytes: Self::device_bytes(self.data.len()),
            })?;

        self.context
            .queue()
            .write_buffer(buffer, 0, bytemuck::cast_slice(&self.data));
        self.context.queue().submit(std::iter::empty());
        self.context.finish();
        Ok(())
    }

    /// Download the device block into the host vector. Blocks on queue
    /// completion before the copy.
    pub fn read(&mut self) -> Result<(), ComputeError> {
        let buffer = self
            .device_buffer
            .as_ref()
            .ok_or(ComputeError::InvalidContext)?;
        let bytes = Self::device_bytes(self.device_len);

        let staging = self.context.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("isoforge staging"),
            size: bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .context
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("isoforge readback"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, bytes);
        self.context.queue().submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.context.finish();

        match rx.recv() {
            Ok(Ok(())) => {}
            _ => {
                self.context.invalidate();
                return Err(ComputeError::InvalidContext);
            }
        }

        {
            let mapped = slice.get_mapped_range();
            self.data.resize(self.device_len, T::zeroed());
            self.data.copy_from_slice(bytemuck::cast_slice(&mapped));
        }
        staging.unmap();
        Ok(())
    }

    /// Drop host data and the device block, restoring accounting.
    pub fn clear(&mut self) {
        self.data.clear();
        self.release_device_buffer();
    }

    /// Debug dump of the host data, one square-ish block per log line.
    pub fn print(&self)
    where
        T: std::fmt::Debug,
    {
        let per_line = (self.data.len() as f64).sqrt().max(1.0) as usize;
        for chunk in self.data.chunks(per_line) {
            log::debug!("{chunk:?}");
        }
    }

    pub fn device_buffer(&self) -> Option<&wgpu::Buffer> {
        self.device_buffer.as_ref()
    }

    fn release_device_buffer(&mut self) {
        if self.device_buffer.take().is_some() {
            self.context.track_release(Self::device_bytes(self.device_len));
            self.device_len = 0;
        }
    }
}

impl<T: Pod> Clone for Buffer<T> {
    /// Copies allocate a fresh device block of equal size; device contents
    /// are not shared between copies.
    fn clone(&self) -> Self {
        let mut copy = Self {
            context: Arc::clone(&self.context),
            data: self.data.clone(),
            device_len: 0,
            device_buffer: None,
        };
        if self.device_buffer.is_some() {
            let _ = copy.create();
        }
        copy
    }
}

impl<T: Pod> Drop for Buffer<T> {
    fn drop(&mut self) {
        self.release_device_buffer();
    }
}
