mod compressed;

use std::collections::HashSet;
use std::io::Read;
use std::mem;

use bytes::{Buf, BufMut};
use sketchd_utils::hash_key;

use crate::estimator::hll::compressed::CompressedList;
use crate::estimator::Estimator;

/// Current version of the persistent HLL encoding.
const VERSION: u8 = 2;

/// DEFAULT_PRECISION is the default precision.
pub const DEFAULT_PRECISION: u8 = 16;

/// p' (sparse) precision, as used in the Google paper.
const SPARSE_PRECISION: u8 = 25;

fn beta(ez: f64) -> f64 {
    let zl = f64::ln(ez + 1_f64);
    -0.37331876643753059 * ez
        + -1.41704077448122989 * zl
        + 0.40729184796612533 * f64::powi(zl, 2)
        + 1.56152033906584164 * f64::powi(zl, 3)
        + -0.99242233534286128 * f64::powi(zl, 4)
        + 0.26064681399483092 * f64::powi(zl, 5)
        + -0.03053811369682807 * f64::powi(zl, 6)
        + 0.00155770210179105 * f64::powi(zl, 7)
}

fn linear_counting(m: u32, v: u32) -> f64 {
    let v = v.max(1);
    m as f64 * f64::ln(m as f64 / v as f64)
}

/// Plus implements the HyperLogLog++ algorithm, described in the following
/// paper: http://static.googleusercontent.com/media/research.google.com/en//pubs/archive/40671.pdf
///
/// Values hash into one of 2^p substreams; each register keeps the longest
/// run of leading zeros seen in its substream. Small sets are held in a
/// compressed sparse representation at precision p' and only converted to
/// the dense register array once the sparse form stops paying for itself.
pub struct Plus {
    /// precision.
    p: u8,
    /// p' (sparse) precision to be used when p ∈ [4..pp] and pp < 64.
    pp: u8,

    /// Number of substreams used for stochastic averaging of the stream.
    m: u32,
    /// m' (sparse) number of substreams.
    mp: u32,

    /// alpha is used for bias correction.
    alpha: f64,

    /// Whether the sketch is still in the sparse representation.
    sparse: bool,
    tmp_set: HashSet<u32>,

    /// The dense representation of the HLL.
    dense_list: Vec<u8>,
    /// Values that can be stored in the sparse representation.
    sparse_list: CompressedList,
}

impl Plus {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_p(DEFAULT_PRECISION)
    }

    pub fn with_p(p: u8) -> anyhow::Result<Self> {
        if !(4..=18).contains(&p) {
            return Err(anyhow!("precision must be between 4 and 18"));
        }

        let pp = SPARSE_PRECISION;

        let m = 1_u32 << p;
        let mp = 1_u32 << pp;

        let alpha = match m {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1_f64 + 1.079 / (m as f64)),
        };

        Ok(Self {
            p,
            pp,
            m,
            mp,
            alpha,
            sparse: true,
            tmp_set: HashSet::new(),
            dense_list: Vec::new(),
            sparse_list: CompressedList::new(m as usize),
        })
    }

    pub fn precision(&self) -> u8 {
        self.p
    }

    /// Count returns the cardinality estimate.
    pub fn count(&mut self) -> u64 {
        if self.sparse {
            self.merge_sparse();
            return linear_counting(self.mp, self.mp - self.sparse_list.count()) as u64;
        }

        let mut sum = 0_f64;
        let mut ez = 0_f64;
        for &v in &self.dense_list {
            if v == 0 {
                ez += 1_f64;
            }
            sum += 1_f64 / (1_u64 << v) as f64;
        }

        let m = self.m as f64;
        (self.alpha * m * (m - ez) / (beta(ez) + sum)) as u64
    }

    /// Encode a hash to be used in the sparse representation.
    fn encode_hash(&self, x: u64) -> u32 {
        let idx = bextr(x, 64 - self.pp, self.pp) as u32;
        if bextr(x, 64 - self.pp, self.pp - self.p) == 0 {
            // The bits between the two precisions are all zero: the register
            // value depends on the remaining bits, store it explicitly.
            let zeros = (bextr(x, 0, 64 - self.pp) << self.pp | (1_u64 << (self.pp - 1)))
                .leading_zeros()
                + 1;
            return idx << 7 | (zeros << 1) | 1;
        }
        idx << 1
    }

    /// decode_hash recovers the dense register index and value from a
    /// sparse-encoded hash.
    fn decode_hash(&self, k: u32) -> (u32, u8) {
        let idx = self.sparse_index(k);
        let dense_idx = idx >> (self.pp - self.p);

        let r = if k & 1 == 1 {
            bextr32(k, 1, 6) as u8 + (self.pp - self.p)
        } else {
            let w = bextr32(idx, 0, self.pp - self.p);
            ((self.pp - self.p) as u32 - (32 - w.leading_zeros())) as u8 + 1
        };

        (dense_idx, r)
    }

    fn sparse_index(&self, k: u32) -> u32 {
        if k & 1 == 1 {
            k >> 7
        } else {
            k >> 1
        }
    }

    fn add_hash_dense(&mut self, x: u64) {
        let i = bextr(x, 64 - self.p, self.p) as usize;
        let w = x << self.p | 1_u64 << (self.p - 1);
        let rho = w.leading_zeros() as u8 + 1;
        if rho > self.dense_list[i] {
            self.dense_list[i] = rho;
        }
    }

    /// merge_sparse folds the unsorted staging set into the sorted
    /// compressed list.
    fn merge_sparse(&mut self) {
        if self.tmp_set.is_empty() {
            return;
        }

        let mut keys: Vec<u32> = self.tmp_set.drain().collect();
        keys.sort_unstable();

        let mut merged = CompressedList::new(self.m as usize);
        let mut iter = self.sparse_list.iter();
        let mut i = 0;
        while iter.has_next() || i < keys.len() {
            if !iter.has_next() {
                merged.append(keys[i]);
                i += 1;
                continue;
            }
            if i >= keys.len() {
                merged.append(iter.next());
                continue;
            }

            let (x1, x2) = (iter.peek(), keys[i]);
            if x1 == x2 {
                merged.append(iter.next());
                i += 1;
            } else if x1 < x2 {
                merged.append(iter.next());
            } else {
                merged.append(keys[i]);
                i += 1;
            }
        }

        self.sparse_list = merged;
    }

    /// to_normal converts the sketch to the dense representation.
    fn to_normal(&mut self) {
        self.merge_sparse();

        self.dense_list = vec![0_u8; self.m as usize];
        let mut iter = self.sparse_list.iter();
        while iter.has_next() {
            let (i, r) = self.decode_hash(iter.next());
            if r > self.dense_list[i as usize] {
                self.dense_list[i as usize] = r;
            }
        }

        self.sparse = false;
        self.tmp_set = HashSet::new();
        self.sparse_list = CompressedList::new(0);
    }
}

impl Estimator for Plus {
    fn add(&mut self, v: &[u8]) {
        let x = hash_key(v);
        if self.sparse {
            self.tmp_set.insert(self.encode_hash(x));
            if (self.tmp_set.len() * 100) as u32 > self.m {
                self.merge_sparse();
                if self.sparse_list.count() > self.m / 2 {
                    self.to_normal();
                }
            }
        } else {
            self.add_hash_dense(x);
        }
    }

    fn bytes(&self) -> usize {
        let mut b = 0;
        b += self.tmp_set.len() * 4;
        b += self.dense_list.capacity();
        b += self.sparse_list.capacity();
        b += mem::size_of::<Self>();
        b
    }

    fn encode(&mut self) -> Vec<u8> {
        let mut data = Vec::with_capacity(16 + self.dense_list.len());
        data.put_u8(VERSION);
        data.put_u8(self.p);

        if self.sparse {
            self.merge_sparse();
            data.put_u8(1);
            data.extend_from_slice(&self.sparse_list.encode());
        } else {
            data.put_u8(0);
            data.put_u32(self.dense_list.len() as u32);
            data.extend_from_slice(&self.dense_list);
        }
        data
    }

    fn decode(data: &[u8]) -> anyhow::Result<Self> {
        let mut cursor = std::io::Cursor::new(data);
        if cursor.remaining() < 3 {
            return Err(anyhow!("hll state truncated"));
        }

        let version = cursor.get_u8();
        if version != VERSION {
            return Err(anyhow!("unsupported hll state version: {}", version));
        }

        let p = cursor.get_u8();
        let mut plus = Self::with_p(p)?;

        match cursor.get_u8() {
            1 => {
                let pos = cursor.position() as usize;
                plus.sparse_list = CompressedList::try_from(&data[pos..])?;
                plus.sparse = true;
            }
            0 => {
                if cursor.remaining() < 4 {
                    return Err(anyhow!("hll state truncated"));
                }
                let sz = cursor.get_u32() as usize;
                if sz != plus.m as usize {
                    return Err(anyhow!(
                        "hll register count mismatch: want {}, got {}",
                        plus.m,
                        sz
                    ));
                }
                let mut dense = vec![0_u8; sz];
                cursor.read_exact(&mut dense)?;
                plus.dense_list = dense;
                plus.sparse = false;
                plus.sparse_list = CompressedList::new(0);
            }
            other => return Err(anyhow!("invalid hll representation flag: {}", other)),
        }

        Ok(plus)
    }
}

/// bextr performs a bitfield extract on v. start should be the LSB of the
/// field you wish to extract, and length the number of bits to extract.
fn bextr(v: u64, start: u8, length: u8) -> u64 {
    (v >> start) & ((1 << length) - 1)
}

fn bextr32(v: u32, start: u8, length: u8) -> u32 {
    (v >> start) & ((1 << length) - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_counts_are_exact() -> anyhow::Result<()> {
        let mut plus = Plus::new()?;
        for v in ["magneto", "wasp", "beast", "magneto"] {
            plus.add(v.as_bytes());
        }
        assert_eq!(plus.count(), 3);
        Ok(())
    }

    #[test]
    fn test_empty_and_empty_value() -> anyhow::Result<()> {
        let mut plus = Plus::new()?;
        assert_eq!(plus.count(), 0);

        // The empty byte string is a value like any other.
        plus.add(b"");
        assert_eq!(plus.count(), 1);
        Ok(())
    }

    #[test]
    fn test_count_is_monotonic() -> anyhow::Result<()> {
        let mut plus = Plus::new()?;
        let mut prev = 0;
        for i in 0..2000_u32 {
            plus.add(format!("value-{}", i).as_bytes());
            if i % 100 == 0 {
                let count = plus.count();
                assert!(count >= prev, "count went from {} to {}", prev, count);
                prev = count;
            }
        }
        Ok(())
    }

    #[test]
    fn test_sparse_encoding_matches_dense() -> anyhow::Result<()> {
        // The sparse encoding must reconstruct exactly the register update
        // the dense path would have made.
        let plus = Plus::with_p(16)?;
        for i in 0..10000_u64 {
            let x = sketchd_utils::hash_u64(i);

            let dense_idx = bextr(x, 64 - plus.p, plus.p) as u32;
            let w = x << plus.p | 1_u64 << (plus.p - 1);
            let rho = w.leading_zeros() as u8 + 1;

            let (got_idx, got_rho) = plus.decode_hash(plus.encode_hash(x));
            assert_eq!(got_idx, dense_idx, "index mismatch for {:#x}", x);
            assert_eq!(got_rho, rho, "rho mismatch for {:#x}", x);
        }
        Ok(())
    }

    #[test]
    fn test_dense_accuracy() -> anyhow::Result<()> {
        let mut plus = Plus::with_p(14)?;
        let n = 100_000_u32;
        for i in 0..n {
            plus.add(format!("user-{}", i).as_bytes());
        }

        let count = plus.count() as f64;
        let err = (count - n as f64).abs() / n as f64;
        assert!(err < 0.05, "relative error {} too large (count {})", err, count);
        Ok(())
    }

    #[test]
    fn test_encode_round_trip_sparse() -> anyhow::Result<()> {
        let mut plus = Plus::new()?;
        for i in 0..50_u32 {
            plus.add(format!("v{}", i).as_bytes());
        }
        let before = plus.count();

        let data = plus.encode();
        let mut decoded = Plus::decode(&data)?;
        assert_eq!(decoded.count(), before);
        Ok(())
    }

    #[test]
    fn test_encode_round_trip_dense() -> anyhow::Result<()> {
        let mut plus = Plus::with_p(10)?;
        for i in 0..5000_u32 {
            plus.add(format!("v{}", i).as_bytes());
        }
        let before = plus.count();

        let data = plus.encode();
        let mut decoded = Plus::decode(&data)?;
        assert_eq!(decoded.count(), before);

        // The decoded sketch keeps estimating.
        decoded.add(b"one-more");
        assert!(decoded.count() >= before);
        Ok(())
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Plus::decode(&[]).is_err());
        assert!(Plus::decode(&[9, 16, 1]).is_err());
        assert!(Plus::decode(&[VERSION, 99, 0, 0]).is_err());
    }

    #[test]
    fn test_decode_rejects_corrupt_sparse_body() -> anyhow::Result<()> {
        let mut plus = Plus::new()?;
        for v in ["magneto", "wasp", "beast"] {
            plus.add(v.as_bytes());
        }
        let mut data = plus.encode();

        // Force a dangling continuation bit onto the final varint byte, as
        // a torn write would. Decode must fail instead of leaving a sketch
        // that panics on the next count.
        let last = data.len() - 1;
        data[last] |= 0x80;
        assert!(Plus::decode(&data).is_err());
        Ok(())
    }

    #[test]
    fn test_precision_bounds() {
        assert!(Plus::with_p(3).is_err());
        assert!(Plus::with_p(19).is_err());
        assert!(Plus::with_p(4).is_ok());
        assert!(Plus::with_p(18).is_ok());
    }
}
