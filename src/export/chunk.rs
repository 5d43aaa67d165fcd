/// Sizes storage round trips from a byte budget and the average record size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSizer {
    budget_bytes: u64,
}

impl ChunkSizer {
    pub fn new(budget_bytes: u64) -> Self {
        Self { budget_bytes }
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    /// Records per chunk: never below 1 and never above `total_wanted`.
    pub fn chunk_size(&self, avg_record_bytes: u64, total_wanted: u64) -> u64 {
        (self.budget_bytes / avg_record_bytes.max(1))
            .min(total_wanted)
            .max(1)
    }
}
