use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, PoisonError,
};

use chrono::Utc;

/// Source of process-unique record identities.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> u64;
}

/// Plain atomic counter.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// 2024-01-01T00:00:00Z in unix milliseconds.
pub const SNOWFLAKE_EPOCH_MS: i64 = 1_704_067_200_000;

const INSTANCE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_INSTANCE: u16 = (1 << INSTANCE_BITS) - 1;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

/// Time-ordered 64-bit ids: 41 bits of milliseconds since [`SNOWFLAKE_EPOCH_MS`],
/// 10 bits of instance, 12 bits of per-millisecond sequence.
///
/// Ids are strictly increasing per generator. When the wall clock moves
/// backwards the generator keeps counting on the last millisecond it saw, and
/// when the sequence is exhausted it borrows the next millisecond.
#[derive(Debug)]
pub struct SnowflakeIdGenerator {
    instance: u64,
    state: Mutex<SnowflakeState>,
}

#[derive(Debug, Default)]
struct SnowflakeState {
    last_ms: u64,
    sequence: u64,
}

impl SnowflakeIdGenerator {
    /// `instance` is masked to 10 bits.
    pub fn new(instance: u16) -> Self {
        Self {
            instance: u64::from(instance & MAX_INSTANCE),
            state: Mutex::new(SnowflakeState::default()),
        }
    }

    fn now_ms() -> u64 {
        let elapsed = Utc::now().timestamp_millis() - SNOWFLAKE_EPOCH_MS;
        u64::try_from(elapsed).unwrap_or(0)
    }

    fn compose(&self, ms: u64, sequence: u64) -> u64 {
        (ms << (INSTANCE_BITS + SEQUENCE_BITS)) | (self.instance << SEQUENCE_BITS) | sequence
    }

    fn next_with_clock(&self, now_ms: u64) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if now_ms > state.last_ms {
            state.last_ms = now_ms;
            state.sequence = 0;
        } else if state.sequence == MAX_SEQUENCE {
            state.last_ms += 1;
            state.sequence = 0;
        } else {
            state.sequence += 1;
        }

        self.compose(state.last_ms, state.sequence)
    }
}

impl IdGenerator for SnowflakeIdGenerator {
    fn next_id(&self) -> u64 {
        self.next_with_clock(Self::now_ms())
    }
}
