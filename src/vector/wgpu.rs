//! wgpu-backed [`DeviceBuffer`].
//!
//! Whole-buffer transfers only: uploads go through `Queue::write_buffer`,
//! downloads stage through a `MAP_READ` buffer and block until the map
//! completes, which is what gives the vector layer its synchronous
//! residency semantics.

use std::marker::PhantomData;
use std::sync::Arc;

use bytemuck::Pod;

use crate::error::QuadrilleError;
use crate::vector::device::DeviceBuffer;

/// GPU-resident buffer usable as the device space of a
/// [`crate::vector::Vector`].
#[derive(Debug)]
pub struct WgpuBuffer<V: Pod> {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    buffer: wgpu::Buffer,
    len: usize,
    _pd: PhantomData<V>,
}

impl<V: Pod + Send + Sync + std::fmt::Debug> WgpuBuffer<V> {
    /// Allocate a zero-initialized storage buffer of `len` elements.
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, len: usize) -> Self {
        let byte_len = (len * std::mem::size_of::<V>()) as u64;
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("quadrille::WgpuBuffer"),
            size: byte_len,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if byte_len > 0 {
            let zeros = vec![V::zeroed(); len];
            queue.write_buffer(&buffer, 0, bytemuck::cast_slice(&zeros));
        }
        Self {
            device,
            queue,
            buffer,
            len,
            _pd: PhantomData,
        }
    }
}

impl<V: Pod + Send + Sync + std::fmt::Debug> DeviceBuffer<V> for WgpuBuffer<V> {
    fn len(&self) -> usize {
        self.len
    }

    fn upload(&mut self, src: &[V]) -> Result<(), QuadrilleError> {
        if src.len() != self.len {
            return Err(QuadrilleError::VectorSizeMismatch {
                role: "device upload",
                expected: self.len,
                found: src.len(),
            });
        }
        if self.len == 0 {
            return Ok(());
        }
        self.queue
            .write_buffer(&self.buffer, 0, bytemuck::cast_slice(src));
        self.queue.submit(std::iter::empty());
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn download(&self, dst: &mut [V]) -> Result<(), QuadrilleError> {
        if dst.len() != self.len {
            return Err(QuadrilleError::VectorSizeMismatch {
                role: "device download",
                expected: self.len,
                found: dst.len(),
            });
        }
        if self.len == 0 {
            return Ok(());
        }
        let byte_len = (self.len * std::mem::size_of::<V>()) as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("quadrille::WgpuBuffer[staging]"),
            size: byte_len,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("WgpuBuffer::download"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging, 0, byte_len);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            sender.send(res).ok();
        });
        self.device.poll(wgpu::Maintain::Wait);
        let mapped = pollster::block_on(receiver.receive())
            .ok_or_else(|| QuadrilleError::DeviceTransfer("map callback dropped".into()))?;
        mapped.map_err(|err| QuadrilleError::DeviceTransfer(err.to_string()))?;

        let data = slice.get_mapped_range();
        dst.copy_from_slice(bytemuck::cast_slice(&data));
        drop(data);
        staging.unmap();
        Ok(())
    }
}
