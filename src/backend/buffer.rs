// GPU buffers for vertex, index, staging and uniform data
//
// A Buffer holds `instance_count` elements of `instance_size` bytes, each
// padded to the device's offset alignment so any instance can be bound on
// its own (e.g. one uniform block per frame in flight).

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;

/// Round `instance_size` up to a multiple of `min_offset_alignment`.
/// Vulkan alignments are powers of two; 0 means no requirement.
pub fn alignment(instance_size: vk::DeviceSize, min_offset_alignment: vk::DeviceSize) -> vk::DeviceSize {
    if min_offset_alignment > 0 {
        (instance_size + min_offset_alignment - 1) & !(min_offset_alignment - 1)
    } else {
        instance_size
    }
}

/// Widen `[offset, offset + size)` to whole non-coherent atoms, as
/// vkFlushMappedMemoryRanges requires. Returns `(offset, size)`.
fn flush_range(
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    atom: vk::DeviceSize,
) -> (vk::DeviceSize, vk::DeviceSize) {
    let atom = atom.max(1);
    let start = offset / atom * atom;
    let end = alignment(offset + size, atom);
    (start, end - start)
}

pub struct Buffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    instance_size: vk::DeviceSize,
    instance_count: u32,
    alignment_size: vk::DeviceSize,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    /// Create a buffer and bind memory from the device allocator.
    ///
    /// `CpuToGpu` / `GpuToCpu` locations are persistently mapped and can be
    /// written directly; `GpuOnly` buffers must be filled with a copy.
    pub fn new(
        device: Arc<VulkanDevice>,
        instance_size: vk::DeviceSize,
        instance_count: u32,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        min_offset_alignment: vk::DeviceSize,
    ) -> Result<Self> {
        if instance_size == 0 || instance_count == 0 {
            anyhow::bail!(
                "Cannot create an empty buffer ({} x {} bytes)",
                instance_count,
                instance_size
            );
        }

        let alignment_size = alignment(instance_size, min_offset_alignment);
        let size = alignment_size * vk::DeviceSize::from(instance_count);

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };
        let allocation = match device.allocate("buffer", requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            device.free(allocation);
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e).context("Failed to bind buffer memory");
        }

        Ok(Self {
            buffer,
            allocation: Some(allocation),
            size,
            instance_size,
            instance_count,
            alignment_size,
            device,
        })
    }

    /// Copy `data` into the mapped memory at `offset`
    pub fn write(&mut self, data: &[u8], offset: vk::DeviceSize) -> Result<()> {
        let end = offset
            .checked_add(data.len() as vk::DeviceSize)
            .filter(|&end| end <= self.size)
            .with_context(|| {
                format!(
                    "Write of {} bytes at offset {} overflows a {} byte buffer",
                    data.len(),
                    offset,
                    self.size
                )
            })?;

        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .context("Buffer memory is not host visible")?;

        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    /// Copy `data` into the slot of instance `index`
    pub fn write_to_index(&mut self, data: &[u8], index: u32) -> Result<()> {
        if index >= self.instance_count {
            anyhow::bail!(
                "Instance index {} out of range (buffer holds {})",
                index,
                self.instance_count
            );
        }
        if data.len() as vk::DeviceSize > self.instance_size {
            anyhow::bail!(
                "{} bytes do not fit an instance of {} bytes",
                data.len(),
                self.instance_size
            );
        }

        self.write(data, vk::DeviceSize::from(index) * self.alignment_size)
    }

    /// Make host writes visible to the device. Coherent memory needs nothing.
    pub fn flush(&self) -> Result<()> {
        let allocation = self.allocation.as_ref().context("Buffer has no memory")?;
        if allocation.mapped_ptr().is_none() {
            anyhow::bail!("Buffer memory is not host visible");
        }
        if allocation
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        {
            return Ok(());
        }

        let (offset, size) = flush_range(
            allocation.offset(),
            self.size,
            self.device.properties.limits.non_coherent_atom_size,
        );

        unsafe {
            let range = vk::MappedMemoryRange::builder()
                .memory(allocation.memory())
                .offset(offset)
                .size(size)
                .build();
            self.device.device.flush_mapped_memory_ranges(&[range])
        }
        .context("Failed to flush buffer memory")
    }

    /// Just the slot of instance `index`
    pub fn descriptor_info_for_index(&self, index: u32) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: vk::DeviceSize::from(index) * self.alignment_size,
            range: self.alignment_size,
        }
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_rounds_up_to_power_of_two() {
        assert_eq!(alignment(192, 256), 256);
        assert_eq!(alignment(256, 256), 256);
        assert_eq!(alignment(257, 256), 512);
        assert_eq!(alignment(1, 4), 4);
    }

    #[test]
    fn zero_alignment_means_tightly_packed() {
        assert_eq!(alignment(24, 0), 24);
        assert_eq!(alignment(24, 1), 24);
    }

    #[test]
    fn flush_range_covers_whole_atoms() {
        // Sub-allocation in the middle of a memory block
        assert_eq!(flush_range(300, 576, 64), (256, 640));
        // Already aligned
        assert_eq!(flush_range(256, 256, 256), (256, 256));
        // Devices reporting an atom of 0 or 1 flush the exact range
        assert_eq!(flush_range(17, 5, 0), (17, 5));
        assert_eq!(flush_range(17, 5, 1), (17, 5));
    }

    #[test]
    fn ubo_slots_are_independently_bindable() {
        // Typical minUniformBufferOffsetAlignment values
        for min in [16, 64, 256] {
            let stride = alignment(192, min);
            assert!(stride >= 192);
            assert_eq!(stride % min, 0);
            assert_eq!((stride * 3) % min, 0);
        }
    }
}
