// Descriptor set layouts, pools and writes
//
// Layouts and pools are assembled with builders; DescriptorWriter collects
// buffer infos for one set and either allocates a fresh set from a
// pool or overwrites an existing one. Mistakes (unknown binding, wrong
// count) surface as errors when the builder is finished.

use anyhow::{Context, Result};
use ash::vk;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::VulkanDevice;

pub const DEFAULT_MAX_SETS: u32 = 1000;

// ============================================================================
// LAYOUT BINDINGS (validation, no device needed)
// ============================================================================

/// Binding table of a set layout
#[derive(Default, Clone)]
pub struct LayoutBindings {
    bindings: BTreeMap<u32, vk::DescriptorSetLayoutBinding>,
    duplicates: Vec<u32>,
}

impl LayoutBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a binding. A repeated binding number keeps the first entry and
    /// makes `validate` fail.
    pub fn add(
        &mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) {
        if self.bindings.contains_key(&binding) {
            self.duplicates.push(binding);
            return;
        }

        self.bindings.insert(
            binding,
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags)
                .build(),
        );
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(binding) = self.duplicates.first() {
            anyhow::bail!("Descriptor binding {} was added more than once", binding);
        }
        if let Some(b) = self.bindings.values().find(|b| b.descriptor_count == 0) {
            anyhow::bail!("Descriptor binding {} has a count of zero", b.binding);
        }
        Ok(())
    }

    pub fn get(&self, binding: u32) -> Option<&vk::DescriptorSetLayoutBinding> {
        self.bindings.get(&binding)
    }

    /// Descriptor type for a single-info write to `binding`
    pub fn check_single_write(&self, binding: u32) -> Result<vk::DescriptorType> {
        let description = self
            .get(binding)
            .with_context(|| format!("Layout does not contain binding {}", binding))?;

        if description.descriptor_count != 1 {
            anyhow::bail!(
                "Binding {} expects {} descriptors, but a single info was written",
                binding,
                description.descriptor_count
            );
        }

        Ok(description.descriptor_type)
    }

    fn to_vec(&self) -> Vec<vk::DescriptorSetLayoutBinding> {
        self.bindings.values().copied().collect()
    }
}

// ============================================================================
// SET LAYOUT
// ============================================================================

pub struct DescriptorSetLayoutBuilder {
    device: Arc<VulkanDevice>,
    bindings: LayoutBindings,
}

impl DescriptorSetLayoutBuilder {
    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) -> Self {
        self.bindings.add(binding, descriptor_type, stage_flags, count);
        self
    }

    pub fn build(self) -> Result<DescriptorSetLayout> {
        self.bindings.validate()?;

        let bindings = self.bindings.to_vec();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        let layout = unsafe {
            self.device
                .device
                .create_descriptor_set_layout(&layout_info, None)
        }
        .context("Failed to create descriptor set layout")?;

        Ok(DescriptorSetLayout {
            layout,
            bindings: self.bindings,
            device: self.device,
        })
    }
}

pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    bindings: LayoutBindings,
    device: Arc<VulkanDevice>,
}

impl DescriptorSetLayout {
    pub fn builder(device: Arc<VulkanDevice>) -> DescriptorSetLayoutBuilder {
        DescriptorSetLayoutBuilder {
            device,
            bindings: LayoutBindings::new(),
        }
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn bindings(&self) -> &LayoutBindings {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

// ============================================================================
// POOL
// ============================================================================

pub struct DescriptorPoolBuilder {
    device: Arc<VulkanDevice>,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    max_sets: u32,
    flags: vk::DescriptorPoolCreateFlags,
}

impl DescriptorPoolBuilder {
    pub fn add_pool_size(mut self, descriptor_type: vk::DescriptorType, count: u32) -> Self {
        self.pool_sizes.push(vk::DescriptorPoolSize {
            ty: descriptor_type,
            descriptor_count: count,
        });
        self
    }

    pub fn pool_flags(mut self, flags: vk::DescriptorPoolCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn max_sets(mut self, count: u32) -> Self {
        self.max_sets = count;
        self
    }

    pub fn build(self) -> Result<DescriptorPool> {
        if self.pool_sizes.is_empty() {
            anyhow::bail!("Descriptor pool needs at least one pool size");
        }
        if self.max_sets == 0 {
            anyhow::bail!("Descriptor pool max_sets must be at least 1");
        }

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&self.pool_sizes)
            .max_sets(self.max_sets)
            .flags(self.flags);

        let pool = unsafe { self.device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        Ok(DescriptorPool {
            pool,
            flags: self.flags,
            device: self.device,
        })
    }
}

pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    flags: vk::DescriptorPoolCreateFlags,
    device: Arc<VulkanDevice>,
}

impl DescriptorPool {
    pub fn builder(device: Arc<VulkanDevice>) -> DescriptorPoolBuilder {
        DescriptorPoolBuilder {
            device,
            pool_sizes: Vec::new(),
            max_sets: DEFAULT_MAX_SETS,
            flags: vk::DescriptorPoolCreateFlags::empty(),
        }
    }

    /// Allocate one set; `None` when the pool has run out of space
    pub fn allocate_descriptor(
        &self,
        layout: vk::DescriptorSetLayout,
    ) -> Result<Option<vk::DescriptorSet>> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        match unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => Ok(sets.into_iter().next()),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) | Err(vk::Result::ERROR_FRAGMENTED_POOL) => {
                log::warn!("Descriptor pool exhausted");
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to allocate descriptor set"),
        }
    }

    /// Return sets to the pool. Requires FREE_DESCRIPTOR_SET on the pool.
    pub fn free_descriptors(&self, sets: &[vk::DescriptorSet]) -> Result<()> {
        check_can_free(self.flags)?;
        if sets.is_empty() {
            return Ok(());
        }

        unsafe { self.device.device.free_descriptor_sets(self.pool, sets) }
            .context("Failed to free descriptor sets")
    }
}

fn check_can_free(flags: vk::DescriptorPoolCreateFlags) -> Result<()> {
    if !flags.contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET) {
        anyhow::bail!("Descriptor pool was not created with FREE_DESCRIPTOR_SET");
    }
    Ok(())
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

// ============================================================================
// WRITER
// ============================================================================

struct PendingWrite {
    binding: u32,
    descriptor_type: vk::DescriptorType,
    info: [vk::DescriptorBufferInfo; 1],
}

pub struct DescriptorWriter<'a> {
    layout: &'a DescriptorSetLayout,
    pool: &'a DescriptorPool,
    writes: Vec<PendingWrite>,
    error: Option<anyhow::Error>,
}

impl<'a> DescriptorWriter<'a> {
    pub fn new(layout: &'a DescriptorSetLayout, pool: &'a DescriptorPool) -> Self {
        Self {
            layout,
            pool,
            writes: Vec::new(),
            error: None,
        }
    }

    pub fn write_buffer(mut self, binding: u32, info: vk::DescriptorBufferInfo) -> Self {
        if self.error.is_some() {
            return self;
        }

        match self.layout.bindings().check_single_write(binding) {
            Ok(descriptor_type) => self.writes.push(PendingWrite {
                binding,
                descriptor_type,
                info: [info],
            }),
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Allocate a set and fill it. `Ok(None)` when the pool is exhausted.
    pub fn build(mut self) -> Result<Option<vk::DescriptorSet>> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let Some(set) = self.pool.allocate_descriptor(self.layout.layout())? else {
            return Ok(None);
        };

        self.overwrite(set)?;
        Ok(Some(set))
    }

    /// Apply the collected writes to an existing set
    pub fn overwrite(&self, set: vk::DescriptorSet) -> Result<()> {
        if let Some(e) = &self.error {
            anyhow::bail!("Invalid descriptor write: {}", e);
        }

        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|write| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(write.binding)
                    .descriptor_type(write.descriptor_type)
                    .buffer_info(&write.info)
                    .build()
            })
            .collect();

        unsafe { self.pool.device.device.update_descriptor_sets(&writes, &[]) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ubo_bindings() -> LayoutBindings {
        let mut bindings = LayoutBindings::new();
        bindings.add(
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::VERTEX,
            1,
        );
        bindings.add(
            1,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
            4,
        );
        bindings
    }

    #[test]
    fn bindings_are_recorded() {
        let bindings = ubo_bindings();
        assert!(bindings.validate().is_ok());
        assert_eq!(bindings.to_vec().len(), 2);

        let ubo = bindings.get(0).unwrap();
        assert_eq!(ubo.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(ubo.stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(ubo.descriptor_count, 1);
    }

    #[test]
    fn duplicate_binding_fails_validation() {
        let mut bindings = ubo_bindings();
        bindings.add(
            0,
            vk::DescriptorType::STORAGE_BUFFER,
            vk::ShaderStageFlags::ALL,
            1,
        );
        assert!(bindings.validate().is_err());
        // First definition wins
        assert_eq!(
            bindings.get(0).unwrap().descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER
        );
    }

    #[test]
    fn zero_count_fails_validation() {
        let mut bindings = LayoutBindings::new();
        bindings.add(
            3,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::VERTEX,
            0,
        );
        assert!(bindings.validate().is_err());
    }

    #[test]
    fn single_write_checks() {
        let bindings = ubo_bindings();
        assert_eq!(
            bindings.check_single_write(0).unwrap(),
            vk::DescriptorType::UNIFORM_BUFFER
        );
        assert!(bindings.check_single_write(1).is_err(), "array binding");
        assert!(bindings.check_single_write(7).is_err(), "unknown binding");
    }

    #[test]
    fn freeing_needs_the_pool_flag() {
        assert!(check_can_free(vk::DescriptorPoolCreateFlags::empty()).is_err());
        assert!(check_can_free(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET).is_ok());
    }

    #[test]
    fn layout_bindings_are_ordered() {
        let mut bindings = LayoutBindings::new();
        for binding in [2, 0, 1] {
            bindings.add(
                binding,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX,
                1,
            );
        }
        let order: Vec<u32> = bindings.to_vec().iter().map(|b| b.binding).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
