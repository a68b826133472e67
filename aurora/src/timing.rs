// GPU timestamp queries
//
// A fixed size query pool is reset at the start of every frame
// (host query reset, so no command buffer is needed) and passes
// write paired start/end timestamps. After present the results are
// read back and resolved into named millisecond timings.

use crate::{AuroraError, Result};
use ash::vk;

const TIMESTAMP_QUERY_POOL_SIZE: u32 = 256;

/// A start/end query pair issued around one pass
pub struct TimestampQuery {
    pub name: String,
    pub start_query: u32,
    pub end_query: u32,
}

/// Resolved timing of one pass in the last finished frame
#[derive(Clone, Debug)]
pub struct RenderPassTime {
    pub name: String,
    pub time_ms: f32,
}

pub struct TimestampQueryPool {
    vk_pool: vk::QueryPool,
    /// nanoseconds per timestamp tick, from device limits
    timestamp_period: f32,
    query_count: u32,
    queries: Vec<TimestampQuery>,
}

impl TimestampQueryPool {
    pub fn new(dev: &ash::Device, timestamp_period: f32) -> Result<Self> {
        let info = vk::QueryPoolCreateInfo::builder()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(TIMESTAMP_QUERY_POOL_SIZE);

        let vk_pool = unsafe {
            dev.create_query_pool(&info, None)
                .or(Err(AuroraError::INVALID))?
        };
        unsafe {
            dev.reset_query_pool(vk_pool, 0, TIMESTAMP_QUERY_POOL_SIZE);
        }

        Ok(Self {
            vk_pool: vk_pool,
            timestamp_period: timestamp_period,
            query_count: 0,
            queries: Vec::new(),
        })
    }

    /// Reset must not happen before the frame using the queries
    /// finished rendering.
    pub fn reset(&mut self, dev: &ash::Device) {
        self.queries.clear();
        unsafe {
            dev.reset_query_pool(self.vk_pool, 0, TIMESTAMP_QUERY_POOL_SIZE);
        }
        self.query_count = 0;
    }

    /// Write a timestamp, returns the query index
    pub fn issue_query(&mut self, dev: &ash::Device, cmd_buffer: vk::CommandBuffer) -> u32 {
        assert!(self.query_count < TIMESTAMP_QUERY_POOL_SIZE);
        let query = self.query_count;
        unsafe {
            dev.cmd_write_timestamp(
                cmd_buffer,
                vk::PipelineStageFlags::ALL_COMMANDS,
                self.vk_pool,
                query,
            );
        }
        self.query_count += 1;
        query
    }

    pub fn push_pass_query(&mut self, query: TimestampQuery) {
        self.queries.push(query);
    }

    /// Index of the most recently pushed query, so a frame-spanning
    /// entry can get its end query patched in later.
    pub fn last_query_index(&self) -> usize {
        self.queries.len() - 1
    }

    pub fn set_end_query(&mut self, index: usize, end_query: u32) {
        self.queries[index].end_query = end_query;
    }

    /// Read back all issued queries, waiting for availability
    pub fn resolve(&self, dev: &ash::Device) -> Result<Vec<RenderPassTime>> {
        if self.query_count == 0 {
            return Ok(Vec::new());
        }

        let mut timestamps = vec![0u64; self.query_count as usize];
        unsafe {
            dev.get_query_pool_results(
                self.vk_pool,
                0,
                self.query_count,
                &mut timestamps,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            )
            .or(Err(AuroraError::INVALID))?;
        }

        let mut timings = Vec::with_capacity(self.queries.len());
        for query in self.queries.iter() {
            let start = timestamps[query.start_query as usize];
            let end = timestamps[query.end_query as usize];
            let nanoseconds = end.saturating_sub(start) as f32 * self.timestamp_period;
            timings.push(RenderPassTime {
                name: query.name.clone(),
                time_ms: nanoseconds * 0.000001,
            });
        }
        Ok(timings)
    }

    pub fn destroy(&mut self, dev: &ash::Device) {
        unsafe {
            dev.destroy_query_pool(self.vk_pool, None);
        }
        self.vk_pool = vk::QueryPool::null();
    }
}
