//! Buffer allocation, uploads and readback for the wgpu backend.

use std::sync::Arc;

use crate::error::GraphicsError;
use crate::types::NativeBufferDescriptor;

use super::super::GpuBuffer;
use super::WgpuBackend;
use super::conversion::convert_buffer_usage;

fn wgpu_buffer(buffer: &GpuBuffer) -> Result<&Arc<wgpu::Buffer>, GraphicsError> {
    match buffer {
        GpuBuffer::Wgpu { buffer, .. } => Ok(buffer),
        GpuBuffer::Dummy(_) => Err(GraphicsError::Internal(
            "wgpu backend used with a non-wgpu buffer".to_string(),
        )),
    }
}

impl WgpuBackend {
    /// Create a buffer resource.
    ///
    /// Allocation failures are caught with an out-of-memory error scope and
    /// reported as [`GraphicsError::AllocationFailed`].
    pub(super) fn create_wgpu_buffer(
        &self,
        descriptor: &NativeBufferDescriptor,
    ) -> Result<GpuBuffer, GraphicsError> {
        if descriptor.size > self.device.limits().max_buffer_size {
            return Err(GraphicsError::AllocationFailed {
                requested: descriptor.size,
            });
        }

        let usage = convert_buffer_usage(descriptor.usage);

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: descriptor.label.as_deref(),
            size: descriptor.size,
            usage,
            mapped_at_creation: false,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            log::error!("wgpu buffer allocation failed: {}", error);
            return Err(GraphicsError::AllocationFailed {
                requested: descriptor.size,
            });
        }

        log::trace!(
            "WgpuBackend: created buffer {:?} (size: {}, hint: {})",
            descriptor.label,
            descriptor.size,
            descriptor.mode.usage_hint()
        );

        Ok(GpuBuffer::Wgpu {
            buffer: Arc::new(buffer),
            size: descriptor.size,
        })
    }

    /// Write data to a buffer.
    ///
    /// wgpu requires 4-byte aligned offsets and sizes. Unaligned tails are
    /// padded with zeros.
    pub(super) fn write_wgpu_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let target = wgpu_buffer(buffer)?;
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "upload offset {offset} is not {}-byte aligned",
                wgpu::COPY_BUFFER_ALIGNMENT
            )));
        }

        let remainder = data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT;
        if remainder == 0 {
            self.queue.write_buffer(target, offset, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(
                data.len() + (wgpu::COPY_BUFFER_ALIGNMENT - remainder) as usize,
                0,
            );
            if offset + padded.len() as u64 > buffer.size() {
                return Err(GraphicsError::InvalidParameter(format!(
                    "padded upload of {} bytes at {} overflows buffer of {} bytes",
                    padded.len(),
                    offset,
                    buffer.size()
                )));
            }
            self.queue.write_buffer(target, offset, &padded);
        }
        Ok(())
    }

    /// Copy the head of one buffer into another and wait for completion.
    pub(super) fn copy_wgpu_buffer(
        &self,
        source: &GpuBuffer,
        destination: &GpuBuffer,
        size: u64,
    ) -> Result<(), GraphicsError> {
        let source = wgpu_buffer(source)?;
        let destination = wgpu_buffer(destination)?;
        let size = size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Buffer Growth Encoder"),
            });
        encoder.copy_buffer_to_buffer(source, 0, destination, 0, size);
        let idx = self.queue.submit(std::iter::once(encoder.finish()));

        let _ = self.device.poll(wgpu::PollType::Wait {
            submission_index: Some(idx),
            timeout: Some(std::time::Duration::from_secs(10)),
        });
        Ok(())
    }

    /// Read data from a buffer through a staging copy.
    pub(super) fn read_wgpu_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64) -> Vec<u8> {
        let Ok(source) = wgpu_buffer(buffer) else {
            return vec![0u8; size as usize];
        };

        let aligned_offset = offset - offset % wgpu::COPY_BUFFER_ALIGNMENT;
        let lead = (offset - aligned_offset) as usize;
        let aligned_size = (size + lead as u64)
            .next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
            .min(buffer.size() - aligned_offset);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Read Staging Buffer"),
            size: aligned_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Read Buffer Encoder"),
            });
        encoder.copy_buffer_to_buffer(source, aligned_offset, &staging, 0, aligned_size);
        let idx = self.queue.submit(std::iter::once(encoder.finish()));

        let _ = self.device.poll(wgpu::PollType::Wait {
            submission_index: Some(idx),
            timeout: Some(std::time::Duration::from_secs(10)),
        });

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        let _ = self.device.poll(wgpu::PollType::wait_indefinitely());
        if !matches!(rx.recv(), Ok(Ok(()))) {
            log::error!("WgpuBackend: failed to map readback buffer");
            return vec![0u8; size as usize];
        }

        let data = {
            let mapped = slice.get_mapped_range();
            let end = (lead + size as usize).min(mapped.len());
            mapped[lead..end].to_vec()
        };
        staging.unmap();

        data
    }
}
