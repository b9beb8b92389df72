//! Round-trip correlation and throughput measurement.

use std::collections::VecDeque;

use thiserror::Error;
use tokio::time::{Duration, Instant};

use crate::transport::FrameId;

/// これを超えたら古い半分を捨てる
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("frame {0} is not pending (never sent, already resolved or evicted)")]
pub struct NotFound(pub FrameId);

/// 送信時刻を挿入順に保持し、応答到着時に往復時間を返す
#[derive(Debug)]
pub struct LatencyTracker {
    pending: VecDeque<(FrameId, Instant)>,
    capacity: usize,
    evicted: u64,
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LatencyTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            pending: VecDeque::with_capacity(capacity + 1),
            capacity,
            evicted: 0,
        }
    }

    pub fn register(&mut self, frame_id: FrameId, sent_at: Instant) {
        // 同じidの二重登録は古い方を置き換える
        self.pending.retain(|(id, _)| *id != frame_id);
        self.pending.push_back((frame_id, sent_at));

        if self.pending.len() > self.capacity {
            let drop_count = self.capacity / 2;
            self.pending.drain(..drop_count);
            self.evicted += drop_count as u64;
            tracing::debug!(dropped = drop_count, "evicted unanswered frames from latency tracker");
        }
    }

    pub fn resolve(&mut self, frame_id: FrameId, now: Instant) -> Result<Duration, NotFound> {
        let index = self
            .pending
            .iter()
            .position(|(id, _)| *id == frame_id)
            .ok_or(NotFound(frame_id))?;
        let (_, sent_at) = self.pending.remove(index).ok_or(NotFound(frame_id))?;
        Ok(now.saturating_duration_since(sent_at))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 応答がないまま捨てたフレームの累計
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// 1秒窓で数えて表示用のレートに落とす
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window: Duration,
    window_start: Instant,
    count: u32,
    rate: f64,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            window: Duration::from_secs(1),
            window_start: now,
            count: 0,
            rate: 0.0,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= self.window {
            self.rate = self.count as f64 / elapsed.as_secs_f64();
            self.count = 0;
            self.window_start = now;
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }
}
