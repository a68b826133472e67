// GPU memory pool allocator
//
// Device memory is allocated in large slabs and sub-allocated from
// a list of spans. The span list is kept sorted by offset and two
// free neighbours are always merged, so external fragmentation stays
// bounded by the allocation pattern. Spans are stored arena style:
// links are indices into a Vec instead of owned pointers, freed ids
// get recycled.

use crate::{AuroraError, Result};
use ash::vk;

use utils::log;

/// Default slab size of a memory pool, 256 MiB
pub const MEMORY_POOL_SIZE: vk::DeviceSize = 256 * 1024 * 1024;

/// Index of a span inside a pool's arena
type SpanId = u32;
const INVALID_SPAN: SpanId = u32::MAX;

/// One backing allocation handed out by a pool.
///
/// `padding` records the bytes inserted in front of `offset` to
/// satisfy alignment. Free needs it to find the original span.
#[derive(Copy, Clone, Debug)]
pub struct Allocation {
    pub pool_index: u32,
    pub memory_type_index: u32,
    pub vk_memory: vk::DeviceMemory,
    pub offset: vk::DeviceSize,
    pub padding: vk::DeviceSize,
}

struct Span {
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    is_free: bool,
    prev: SpanId,
    next: SpanId,
}

/// Sub-allocator over one vkDeviceMemory slab
pub struct MemoryPool {
    vk_memory: vk::DeviceMemory,
    memory_type_index: u32,
    slab_size: vk::DeviceSize,
    free_size: vk::DeviceSize,
    spans: Vec<Span>,
    recycled_span_ids: Vec<SpanId>,
    head: SpanId,
}

impl MemoryPool {
    /// Allocate a new slab of `size` bytes of the given memory type
    pub fn new(
        dev: &ash::Device,
        memory_type_index: u32,
        size: vk::DeviceSize,
    ) -> Result<MemoryPool> {
        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type_index);

        let vk_memory = unsafe {
            dev.allocate_memory(&info, None)
                .or(Err(AuroraError::OUT_OF_DEVICE_MEMORY))?
        };

        Ok(Self::with_slab(vk_memory, memory_type_index, size))
    }

    /// Wrap an existing slab. Used directly by the allocator tests,
    /// which run without a device.
    pub fn with_slab(
        vk_memory: vk::DeviceMemory,
        memory_type_index: u32,
        size: vk::DeviceSize,
    ) -> MemoryPool {
        MemoryPool {
            vk_memory: vk_memory,
            memory_type_index: memory_type_index,
            slab_size: size,
            free_size: size,
            spans: vec![Span {
                offset: 0,
                size: size,
                is_free: true,
                prev: INVALID_SPAN,
                next: INVALID_SPAN,
            }],
            recycled_span_ids: Vec::new(),
            head: 0,
        }
    }

    pub fn destroy(&mut self, dev: &ash::Device) {
        unsafe {
            dev.free_memory(self.vk_memory, None);
        }
        self.vk_memory = vk::DeviceMemory::null();
    }

    fn add_span(&mut self, span: Span) -> SpanId {
        if let Some(id) = self.recycled_span_ids.pop() {
            self.spans[id as usize] = span;
            return id;
        }
        self.spans.push(span);
        self.spans.len() as SpanId - 1
    }

    /// First-fit allocation
    ///
    /// Walks the span list for the first free span whose padded size
    /// fits, splits off the remainder and returns the allocation.
    /// None means no span fits and the caller should go to the next
    /// pool. Linear walk is fine, span counts stay small.
    pub fn allocate(&mut self, size: vk::DeviceSize, alignment: vk::DeviceSize) -> Option<Allocation> {
        assert!(alignment > 0);
        if size > self.free_size {
            return None;
        }

        let mut current = self.head;
        while current != INVALID_SPAN {
            let (offset, span_size, is_free, next) = {
                let s = &self.spans[current as usize];
                (s.offset, s.size, s.is_free, s.next)
            };
            if is_free {
                // pad to alignment
                let padding = (alignment - (offset % alignment)) % alignment;
                let padded_size = size + padding;
                if padded_size <= span_size {
                    self.free_size -= padded_size;

                    // the found span becomes the occupied one, the
                    // remainder is split into a new free span behind it
                    let remaining = span_size - padded_size;
                    self.spans[current as usize].is_free = false;
                    if remaining > 0 {
                        self.spans[current as usize].size = padded_size;
                        let remainder = self.add_span(Span {
                            offset: offset + padded_size,
                            size: remaining,
                            is_free: true,
                            prev: current,
                            next: next,
                        });
                        self.spans[current as usize].next = remainder;
                        if next != INVALID_SPAN {
                            self.spans[next as usize].prev = remainder;
                        }
                    }

                    return Some(Allocation {
                        pool_index: 0, // filled in by the allocator
                        memory_type_index: self.memory_type_index,
                        vk_memory: self.vk_memory,
                        offset: offset + padding,
                        padding: padding,
                    });
                }
            }
            current = next;
        }
        None
    }

    /// Merge span `second` into `first`. Both must be free and
    /// adjacent with first preceding second.
    fn merge_neighbours(&mut self, first: SpanId, second: SpanId) {
        assert!(self.spans[first as usize].is_free);
        assert!(self.spans[second as usize].is_free);

        let second_size = self.spans[second as usize].size;
        let second_next = self.spans[second as usize].next;

        self.spans[first as usize].size += second_size;
        self.spans[first as usize].next = second_next;
        if second_next != INVALID_SPAN {
            self.spans[second_next as usize].prev = first;
        }
        self.recycled_span_ids.push(second);
    }

    /// Return an allocation to the pool, coalescing with free
    /// neighbours on both sides.
    pub fn free(&mut self, allocation: &Allocation) {
        let original_offset = allocation.offset - allocation.padding;

        let mut current = self.head;
        while current != INVALID_SPAN {
            if self.spans[current as usize].offset == original_offset
                && !self.spans[current as usize].is_free
            {
                self.spans[current as usize].is_free = true;
                self.free_size += self.spans[current as usize].size;

                let prev = self.spans[current as usize].prev;
                if prev != INVALID_SPAN && self.spans[prev as usize].is_free {
                    self.merge_neighbours(prev, current);
                    current = prev;
                }
                let next = self.spans[current as usize].next;
                if next != INVALID_SPAN && self.spans[next as usize].is_free {
                    self.merge_neighbours(current, next);
                }
                return;
            }
            current = self.spans[current as usize].next;
        }
        log::error!("MemoryPool::free did not find the input allocation, this should not happen");
    }

    pub fn used(&self) -> vk::DeviceSize {
        self.slab_size - self.free_size
    }

    pub fn allocated(&self) -> vk::DeviceSize {
        self.slab_size
    }

    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    /// Number of spans currently in the list, for tests
    #[cfg(test)]
    fn span_count(&self) -> usize {
        let mut count = 0;
        let mut current = self.head;
        while current != INVALID_SPAN {
            count += 1;
            current = self.spans[current as usize].next;
        }
        count
    }

    /// Verify the structural invariants: sorted by offset, no two
    /// adjacent free spans, sizes sum to the slab size.
    #[cfg(test)]
    fn check_invariants(&self) {
        let mut total = 0;
        let mut last_end = 0;
        let mut last_free = false;
        let mut current = self.head;
        let mut first = true;
        while current != INVALID_SPAN {
            let s = &self.spans[current as usize];
            assert_eq!(s.offset, last_end, "spans must be contiguous and sorted");
            if !first {
                assert!(!(last_free && s.is_free), "two adjacent free spans");
            }
            total += s.size;
            last_end = s.offset + s.size;
            last_free = s.is_free;
            first = false;
            current = s.next;
        }
        assert_eq!(total, self.slab_size);
    }
}

/// Picks the memory type index for the requested property flags.
///
/// Integrated GPUs may not expose a device-local-only type for
/// every resource, so when nothing matches the device-local bit is
/// dropped and the search repeated.
pub fn find_memory_index(
    props: &vk::PhysicalDeviceMemoryProperties,
    memory_type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    for (i, mem_type) in props.memory_types[..props.memory_type_count as usize]
        .iter()
        .enumerate()
    {
        if (memory_type_bits >> i) & 1 == 1 && mem_type.property_flags.contains(flags) {
            return Some(i as u32);
        }
    }
    if flags.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL) {
        return find_memory_index(
            props,
            memory_type_bits,
            flags & !vk::MemoryPropertyFlags::DEVICE_LOCAL,
        );
    }
    None
}

/// Fan-out over one pool list per memory type
///
/// Allocation walks the pools of the matching type and appends a
/// fresh pool when all of them are exhausted. Pool creation failure
/// is fatal for the caller.
pub struct MemoryAllocator {
    mem_props: vk::PhysicalDeviceMemoryProperties,
    pools: Vec<MemoryPool>,
}

impl MemoryAllocator {
    pub fn new(mem_props: vk::PhysicalDeviceMemoryProperties) -> Self {
        Self {
            mem_props: mem_props,
            pools: Vec::new(),
        }
    }

    pub fn allocate(
        &mut self,
        dev: &ash::Device,
        reqs: &vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<Allocation> {
        let memory_type_index =
            find_memory_index(&self.mem_props, reqs.memory_type_bits, flags)
                .ok_or(AuroraError::NO_SUITABLE_MEMORY_TYPE)?;

        // try the existing pools of that type first
        for (i, pool) in self.pools.iter_mut().enumerate() {
            if pool.memory_type_index() != memory_type_index {
                continue;
            }
            if let Some(mut alloc) = pool.allocate(reqs.size, reqs.alignment) {
                alloc.pool_index = i as u32;
                return Ok(alloc);
            }
        }

        // all pools exhausted, append a new one
        let slab_size = utils::partial_max(MEMORY_POOL_SIZE, reqs.size);
        let mut pool = MemoryPool::new(dev, memory_type_index, slab_size)?;
        let mut alloc = pool
            .allocate(reqs.size, reqs.alignment)
            .ok_or(AuroraError::OUT_OF_DEVICE_MEMORY)?;
        alloc.pool_index = self.pools.len() as u32;
        self.pools.push(pool);
        Ok(alloc)
    }

    pub fn free(&mut self, allocation: &Allocation) {
        self.pools[allocation.pool_index as usize].free(allocation);
    }

    /// Running (allocated, used) byte counters over all pools
    pub fn memory_stats(&self) -> (vk::DeviceSize, vk::DeviceSize) {
        let mut allocated = 0;
        let mut used = 0;
        for pool in self.pools.iter() {
            allocated += pool.allocated();
            used += pool.used();
        }
        (allocated, used)
    }

    pub fn destroy(&mut self, dev: &ash::Device) {
        for pool in self.pools.iter_mut() {
            pool.destroy(dev);
        }
        self.pools.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool(size: vk::DeviceSize) -> MemoryPool {
        MemoryPool::with_slab(vk::DeviceMemory::null(), 0, size)
    }

    #[test]
    fn alignment_and_accounting() {
        let mut pool = test_pool(4096);
        let a = pool.allocate(100, 64).unwrap();
        assert_eq!(a.offset % 64, 0);
        let b = pool.allocate(10, 256).unwrap();
        assert_eq!(b.offset % 256, 0);
        assert!(b.offset >= a.offset + 100 || a.offset >= b.offset + 10);

        // used + free == capacity at all times
        assert_eq!(pool.used() + (pool.allocated() - pool.used()), 4096);
        pool.check_invariants();

        pool.free(&a);
        pool.free(&b);
        assert_eq!(pool.used(), 0);
        // after freeing everything a single free span covers the slab
        assert_eq!(pool.span_count(), 1);
        pool.check_invariants();
    }

    #[test]
    fn no_live_overlap() {
        let mut pool = test_pool(1 << 16);
        let mut live: Vec<(u64, u64)> = Vec::new();
        for i in 0..32u64 {
            let size = 64 + i * 16;
            let alloc = pool.allocate(size, 32).unwrap();
            let range = (alloc.offset, alloc.offset + size);
            for other in live.iter() {
                assert!(range.1 <= other.0 || other.1 <= range.0, "live ranges overlap");
            }
            live.push(range);
            pool.check_invariants();
        }
    }

    #[test]
    fn coalescing() {
        let mut pool = test_pool(4096);
        let a = pool.allocate(512, 1).unwrap();
        let b = pool.allocate(512, 1).unwrap();
        let c = pool.allocate(512, 1).unwrap();
        // a, b, c and the trailing free span
        assert_eq!(pool.span_count(), 4);

        pool.free(&b);
        // freeing the middle one cannot merge anything
        assert_eq!(pool.span_count(), 4);
        pool.free(&a);
        // a and b merge
        assert_eq!(pool.span_count(), 3);
        pool.free(&c);
        // everything merges back into one span
        assert_eq!(pool.span_count(), 1);
        assert_eq!(pool.used(), 0);
        pool.check_invariants();
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut pool = test_pool(1024);
        assert!(pool.allocate(2048, 1).is_none());
        let _a = pool.allocate(1024, 1).unwrap();
        assert!(pool.allocate(1, 1).is_none());
    }

    #[test]
    fn padded_free_finds_span() {
        let mut pool = test_pool(4096);
        // force padding by allocating an unaligned prefix
        let a = pool.allocate(10, 1).unwrap();
        let b = pool.allocate(100, 256).unwrap();
        assert!(b.padding > 0);
        pool.free(&b);
        pool.free(&a);
        assert_eq!(pool.span_count(), 1);
        pool.check_invariants();
    }

    #[test]
    fn allocator_stress() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        // multiple pools, interleaved random allocs and frees
        let mut pools = vec![test_pool(1 << 20), test_pool(1 << 20), test_pool(1 << 20)];
        let mut rng = StdRng::seed_from_u64(0x517ec0de);
        let mut live: Vec<(usize, Allocation, u64)> = Vec::new();
        let mut live_bytes: u64 = 0;

        for _ in 0..10000 {
            if rng.gen_bool(0.6) || live.is_empty() {
                let size = rng.gen_range(16..8192) as u64;
                let alignment = 1 << rng.gen_range(0..9);
                let pool_index = rng.gen_range(0..pools.len());
                if let Some(alloc) = pools[pool_index].allocate(size, alignment) {
                    live_bytes += size + alloc.padding;
                    live.push((pool_index, alloc, size));
                }
            } else {
                let victim = rng.gen_range(0..live.len());
                let (pool_index, alloc, size) = live.swap_remove(victim);
                pools[pool_index].free(&alloc);
                live_bytes -= size + alloc.padding;
            }

            let used: u64 = pools.iter().map(|p| p.used()).sum();
            assert_eq!(used, live_bytes);
        }

        for (pool_index, alloc, _) in live.drain(..) {
            pools[pool_index].free(&alloc);
        }
        for pool in pools.iter() {
            assert_eq!(pool.used(), 0);
        }
        for pool in pools.iter() {
            pool.check_invariants();
        }
    }

    #[test]
    fn memory_index_fallback_drops_device_local() {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = 1;
        props.memory_types[0].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        let index = find_memory_index(
            &props,
            0x1,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        );
        assert_eq!(index, Some(0));
    }
}
