use std::mem;

use bytes::{Buf, BufMut};
use sketchd_utils::hash_key_seed;

use crate::estimator::Estimator;

/// Current version of the persistent CML encoding.
const VERSION: u8 = 1;

/// Widest value a 16-bit log counter can hold.
const MAX_COUNTER: u16 = u16::MAX;

/// DEFAULT_CAPACITY bounds the count an individual key is expected to reach.
pub const DEFAULT_CAPACITY: u64 = 1_000_000;

/// DEFAULT_ERROR_RATE is the relative error epsilon of the estimates.
pub const DEFAULT_ERROR_RATE: f64 = 0.01;

/// DEFAULT_CONFIDENCE is the probability that an estimate is within epsilon.
pub const DEFAULT_CONFIDENCE: f64 = 0.99;

/// suggest_width returns the number of counters per row needed for a
/// relative error of epsilon.
pub fn suggest_width(error_rate: f64) -> usize {
    (std::f64::consts::E / error_rate).ceil() as usize
}

/// suggest_depth returns the number of rows needed for the given confidence.
pub fn suggest_depth(confidence: f64) -> usize {
    f64::ln(1.0 / (1.0 - confidence)).ceil().max(1.0) as usize
}

/// solve_base finds the log-counter growth base so that a saturated counter
/// decompresses to capacity. Capacities within u16 range solve to 1, i.e.
/// plain exact counters.
fn solve_base(capacity: u64) -> f64 {
    if capacity <= MAX_COUNTER as u64 {
        return 1.0;
    }

    let target = capacity as f64;
    let mut lo = 1.0_f64;
    let mut hi = 2.0_f64;
    for _ in 0..64 {
        let mid = (lo + hi) / 2.0;
        let span = (mid.powf(MAX_COUNTER as f64) - 1.0) / (mid - 1.0);
        if !span.is_finite() || span >= target {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi
}

/// CountMinLog is a count-min sketch over 16-bit log-scale counters with
/// conservative updates.
///
/// Each value maps to one counter per row through independently seeded
/// hashes. Every update bumps the minimum counters by one, and the estimate
/// decompresses the minimum counter through the growth base. Since the
/// decompressed value of c counter steps is never below c, estimates never
/// fall below the number of updates a key received: one-sided error for any
/// key that stays within the declared capacity, at the price of growing
/// overestimation once a counter leaves the exact range. Deletions decrement
/// the same minimum set of counters.
pub struct CountMinLog {
    /// Counters per row.
    w: usize,
    /// Rows (independent hash functions).
    d: usize,
    /// Log-counter growth base; 1 means exact counters.
    base: f64,
    /// d * w counters, row-major.
    registers: Vec<u16>,
}

impl CountMinLog {
    pub fn new(capacity: u64, error_rate: f64, confidence: f64) -> anyhow::Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("capacity must be positive"));
        }
        if !(error_rate > 0.0 && error_rate < 1.0) {
            return Err(anyhow!("error rate must be in (0, 1)"));
        }
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(anyhow!("confidence must be in (0, 1)"));
        }

        let w = suggest_width(error_rate);
        let d = suggest_depth(confidence);
        Ok(Self::with_dimensions(w, d, solve_base(capacity)))
    }

    fn with_dimensions(w: usize, d: usize, base: f64) -> Self {
        Self {
            w,
            d,
            base,
            registers: vec![0; w * d],
        }
    }

    pub fn width(&self) -> usize {
        self.w
    }

    pub fn depth(&self) -> usize {
        self.d
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    /// cells returns the register index of v in each row.
    fn cells(&self, v: &[u8]) -> Vec<usize> {
        (0..self.d)
            .map(|row| row * self.w + (hash_key_seed(v, row as u64) as usize) % self.w)
            .collect()
    }

    fn min_counter(&self, cells: &[usize]) -> u16 {
        cells.iter().map(|&i| self.registers[i]).min().unwrap_or(0)
    }

    /// point_value decompresses a counter through the growth base. For any
    /// base >= 1 the result is at least c, which keeps estimates one-sided.
    fn point_value(&self, c: u16) -> f64 {
        if c == 0 {
            return 0.0;
        }
        if self.base == 1.0 {
            return c as f64;
        }
        (self.base.powf(c as f64) - 1.0) / (self.base - 1.0)
    }

    /// Increase counts one occurrence of v: the minimum counters grow by
    /// one step, saturating once they decompress to capacity.
    pub fn increase(&mut self, v: &[u8]) {
        let cells = self.cells(v);
        let c = self.min_counter(&cells);
        if c >= MAX_COUNTER {
            return;
        }
        for &i in &cells {
            if self.registers[i] == c {
                self.registers[i] = c + 1;
            }
        }
    }

    /// Decrease removes one occurrence of v. Counters already at zero are
    /// left alone.
    pub fn decrease(&mut self, v: &[u8]) {
        let cells = self.cells(v);
        let c = self.min_counter(&cells);
        if c == 0 {
            return;
        }
        for &i in &cells {
            if self.registers[i] == c {
                self.registers[i] = c - 1;
            }
        }
    }

    /// Frequency returns the estimated count of v.
    pub fn frequency(&self, v: &[u8]) -> u64 {
        let cells = self.cells(v);
        self.point_value(self.min_counter(&cells)).round() as u64
    }
}

impl Estimator for CountMinLog {
    fn add(&mut self, v: &[u8]) {
        self.increase(v);
    }

    fn bytes(&self) -> usize {
        self.registers.capacity() * mem::size_of::<u16>() + mem::size_of::<Self>()
    }

    fn encode(&mut self) -> Vec<u8> {
        let mut data = Vec::with_capacity(1 + 8 + 4 + 4 + self.registers.len() * 2);
        data.put_u8(VERSION);
        data.put_f64(self.base);
        data.put_u32(self.w as u32);
        data.put_u32(self.d as u32);
        for &r in &self.registers {
            data.put_u16(r);
        }
        data
    }

    fn decode(data: &[u8]) -> anyhow::Result<Self> {
        let mut cursor = std::io::Cursor::new(data);
        if cursor.remaining() < 1 + 8 + 4 + 4 {
            return Err(anyhow!("cml state truncated"));
        }

        let version = cursor.get_u8();
        if version != VERSION {
            return Err(anyhow!("unsupported cml state version: {}", version));
        }

        let base = cursor.get_f64();
        if !base.is_finite() || base < 1.0 {
            return Err(anyhow!("invalid cml base: {}", base));
        }
        let w = cursor.get_u32() as usize;
        let d = cursor.get_u32() as usize;
        if w == 0 || d == 0 {
            return Err(anyhow!("invalid cml dimensions: {}x{}", d, w));
        }
        if cursor.remaining() != w * d * 2 {
            return Err(anyhow!(
                "cml register block mismatch: want {} bytes, have {}",
                w * d * 2,
                cursor.remaining()
            ));
        }

        let mut sketch = Self::with_dimensions(w, d, base);
        for r in sketch.registers.iter_mut() {
            *r = cursor.get_u16();
        }
        Ok(sketch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_counts_within_u16_capacity() -> anyhow::Result<()> {
        let mut sketch = CountMinLog::new(100, DEFAULT_ERROR_RATE, DEFAULT_CONFIDENCE)?;
        assert_eq!(sketch.base(), 1.0);

        for v in ["magneto", "wasp", "beast", "magneto"] {
            sketch.increase(v.as_bytes());
        }
        assert_eq!(sketch.frequency(b"magneto"), 2);
        assert_eq!(sketch.frequency(b"wasp"), 1);
        assert_eq!(sketch.frequency(b"beast"), 1);
        assert_eq!(sketch.frequency(b"juggernaut"), 0);
        Ok(())
    }

    #[test]
    fn test_never_underestimates() -> anyhow::Result<()> {
        let mut sketch = CountMinLog::new(65535, 0.05, DEFAULT_CONFIDENCE)?;
        let n = 500_u32;
        for i in 0..n {
            // Repeats proportional to the value index.
            for _ in 0..(i % 5 + 1) {
                sketch.increase(format!("key-{}", i).as_bytes());
            }
        }
        for i in 0..n {
            let truth = (i % 5 + 1) as u64;
            let est = sketch.frequency(format!("key-{}", i).as_bytes());
            assert!(est >= truth, "key-{}: estimate {} below true {}", i, est, truth);
        }
        Ok(())
    }

    #[test]
    fn test_never_underestimates_with_log_base() -> anyhow::Result<()> {
        // The one-sided guarantee must also hold once the growth base is
        // above 1 and counters leave the exact range.
        let mut sketch = CountMinLog::new(1_000_000, DEFAULT_ERROR_RATE, DEFAULT_CONFIDENCE)?;
        assert!(sketch.base() > 1.0);

        let n = 66_000_u64;
        for _ in 0..n {
            sketch.increase(b"magneto");
        }
        assert!(sketch.frequency(b"magneto") >= n);

        let m = 1_000_u64;
        for _ in 0..m {
            sketch.increase(b"wasp");
        }
        assert!(sketch.frequency(b"wasp") >= m);
        Ok(())
    }

    #[test]
    fn test_decrease() -> anyhow::Result<()> {
        let mut sketch = CountMinLog::new(1000, DEFAULT_ERROR_RATE, DEFAULT_CONFIDENCE)?;
        for _ in 0..3 {
            sketch.increase(b"magneto");
        }
        sketch.decrease(b"magneto");
        assert_eq!(sketch.frequency(b"magneto"), 2);

        // Decreasing an absent key is a no-op.
        sketch.decrease(b"phoenix");
        assert_eq!(sketch.frequency(b"phoenix"), 0);
        Ok(())
    }

    #[test]
    fn test_log_base_spans_large_capacity() {
        let base = solve_base(10_000_000);
        assert!(base > 1.0);
        let span = (base.powf(MAX_COUNTER as f64) - 1.0) / (base - 1.0);
        assert!(span >= 10_000_000.0);

        assert_eq!(solve_base(100), 1.0);
        assert_eq!(solve_base(65535), 1.0);
    }

    #[test]
    fn test_large_capacity_counts_small_values() -> anyhow::Result<()> {
        // Low counters decompress to within rounding of the true count.
        let mut sketch = CountMinLog::new(100_000, DEFAULT_ERROR_RATE, DEFAULT_CONFIDENCE)?;
        assert!(sketch.base() > 1.0);

        sketch.increase(b"magneto");
        sketch.increase(b"magneto");
        assert_eq!(sketch.frequency(b"magneto"), 2);
        Ok(())
    }

    #[test]
    fn test_sizing_helpers() {
        assert_eq!(suggest_width(0.01), 272);
        assert_eq!(suggest_width(0.1), 28);
        assert_eq!(suggest_depth(0.99), 5);
        assert_eq!(suggest_depth(0.682689492), 2);
    }

    #[test]
    fn test_encode_round_trip() -> anyhow::Result<()> {
        let mut sketch = CountMinLog::new(100_000, DEFAULT_ERROR_RATE, DEFAULT_CONFIDENCE)?;
        for v in ["a", "b", "a", "c", "a"] {
            sketch.increase(v.as_bytes());
        }

        let data = sketch.encode();
        let decoded = CountMinLog::decode(&data)?;
        assert_eq!(decoded.width(), sketch.width());
        assert_eq!(decoded.depth(), sketch.depth());
        assert_eq!(decoded.frequency(b"a"), sketch.frequency(b"a"));
        assert_eq!(decoded.frequency(b"b"), sketch.frequency(b"b"));
        Ok(())
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(CountMinLog::decode(&[]).is_err());
        assert!(CountMinLog::decode(&[9; 32]).is_err());
    }
}
