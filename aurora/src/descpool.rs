// Descriptor pool management
//
// A pool of descriptor pools. Each pool tracks how many allocations
// of every descriptor type it has left; a set is allocated from the
// first pool that fits and a new pool is appended when none does.
// Sets are never freed individually, pools go away at shutdown.

use crate::{AuroraError, Result};
use ash::vk;

/// How many descriptors of each type a fresh pool provides
const INITIAL_POOL_SIZES: PoolSizes = PoolSizes {
    set_count: 128,
    sampled_image: 128,
    storage_image: 128,
    uniform_buffer: 128,
    storage_buffer: 128,
    sampler: 128,
};

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PoolSizes {
    pub set_count: u32,
    pub sampled_image: u32,
    pub storage_image: u32,
    pub uniform_buffer: u32,
    pub storage_buffer: u32,
    pub sampler: u32,
}

impl PoolSizes {
    /// component-wise: does this pool have room for `required`
    pub fn fits(&self, required: &PoolSizes) -> bool {
        self.set_count >= required.set_count
            && self.sampled_image >= required.sampled_image
            && self.storage_image >= required.storage_image
            && self.uniform_buffer >= required.uniform_buffer
            && self.storage_buffer >= required.storage_buffer
            && self.sampler >= required.sampler
    }

    fn subtract(&mut self, required: &PoolSizes) {
        self.set_count -= required.set_count;
        self.sampled_image -= required.sampled_image;
        self.storage_image -= required.storage_image;
        self.uniform_buffer -= required.uniform_buffer;
        self.storage_buffer -= required.storage_buffer;
        self.sampler -= required.sampler;
    }
}

struct DescriptorPool {
    vk_pool: vk::DescriptorPool,
    free_allocations: PoolSizes,
}

pub struct DescriptorPoolManager {
    pools: Vec<DescriptorPool>,
}

impl DescriptorPoolManager {
    pub fn new() -> Self {
        Self { pools: Vec::new() }
    }

    fn create_pool(dev: &ash::Device) -> Result<DescriptorPool> {
        let sizes = [
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(INITIAL_POOL_SIZES.sampled_image)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(INITIAL_POOL_SIZES.storage_image)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(INITIAL_POOL_SIZES.uniform_buffer)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(INITIAL_POOL_SIZES.storage_buffer)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::SAMPLER)
                .descriptor_count(INITIAL_POOL_SIZES.sampler)
                .build(),
        ];

        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&sizes)
            .max_sets(INITIAL_POOL_SIZES.set_count);

        let vk_pool = unsafe {
            dev.create_descriptor_pool(&info, None)
                .or(Err(AuroraError::DESCRIPTOR_POOL_CREATION_FAILED))?
        };

        Ok(DescriptorPool {
            vk_pool: vk_pool,
            free_allocations: INITIAL_POOL_SIZES,
        })
    }

    /// Allocate a set of `layout`, growing the pool list on demand.
    /// `required` must match what the layout consumes, it is
    /// derived from reflection or material flags by the caller.
    pub fn allocate_set(
        &mut self,
        dev: &ash::Device,
        layout: vk::DescriptorSetLayout,
        required: &PoolSizes,
    ) -> Result<vk::DescriptorSet> {
        let pool_index = match self
            .pools
            .iter()
            .position(|p| p.free_allocations.fits(required))
        {
            Some(index) => index,
            None => {
                self.pools.push(Self::create_pool(dev)?);
                self.pools.len() - 1
            }
        };

        let pool = &mut self.pools[pool_index];
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool.vk_pool)
            .set_layouts(&layouts);

        let sets = unsafe {
            dev.allocate_descriptor_sets(&info)
                .or(Err(AuroraError::DESCRIPTOR_POOL_CREATION_FAILED))?
        };
        pool.free_allocations.subtract(required);

        Ok(sets[0])
    }

    pub fn destroy(&mut self, dev: &ash::Device) {
        unsafe {
            for pool in self.pools.iter() {
                dev.destroy_descriptor_pool(pool.vk_pool, None);
            }
        }
        self.pools.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_wise_fit() {
        let mut free = INITIAL_POOL_SIZES;
        let required = PoolSizes {
            set_count: 1,
            sampled_image: 3,
            storage_image: 0,
            uniform_buffer: 1,
            storage_buffer: 0,
            sampler: 2,
        };
        assert!(free.fits(&required));
        free.subtract(&required);
        assert_eq!(free.sampled_image, 125);

        // one exhausted component fails the whole fit
        free.sampler = 1;
        let wants_samplers = PoolSizes {
            sampler: 2,
            ..Default::default()
        };
        assert!(!free.fits(&wants_samplers));
    }
}
