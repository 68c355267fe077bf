use std::io::Read;
use std::mem;

use bytes::{Buf, BufMut};

use crate::estimator::cml::CountMinLog;
use crate::estimator::Estimator;

/// Current version of the persistent top-k encoding.
const VERSION: u8 = 1;

/// DEFAULT_K is the ranking size when no capacity is given.
pub const DEFAULT_K: usize = 100;

/// Count sketch parameters backing the candidate list. The counters stay
/// exact (base 1), which keeps the ranking stable between writes.
const SKETCH_CAPACITY: u64 = u16::MAX as u64;
const SKETCH_ERROR_RATE: f64 = 0.001;
const SKETCH_CONFIDENCE: f64 = 0.99;

#[derive(Clone)]
struct Element {
    key: Vec<u8>,
    count: u64,
}

/// TopK tracks the k most frequent values of a stream: a count-min sketch
/// estimates every value's frequency, and a bounded candidate list keeps the
/// current heavy hitters.
///
/// The list is kept unsorted; the eviction scan finds the minimum when a new
/// candidate arrives, and ordering is deferred to queries.
pub struct TopK {
    k: usize,
    sketch: CountMinLog,
    elements: Vec<Element>,
}

impl TopK {
    pub fn new(k: usize) -> anyhow::Result<Self> {
        if k == 0 {
            return Err(anyhow!("k must be positive"));
        }
        Ok(Self {
            k,
            sketch: CountMinLog::new(SKETCH_CAPACITY, SKETCH_ERROR_RATE, SKETCH_CONFIDENCE)?,
            elements: Vec::new(),
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// ranking returns the current top-k as (value, estimated count) pairs,
    /// ordered by count descending with ties broken by value ascending.
    pub fn ranking(&self) -> Vec<(Vec<u8>, u64)> {
        let mut result: Vec<_> = self
            .elements
            .iter()
            .map(|e| (e.key.clone(), e.count))
            .collect();
        result.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        result
    }

    fn observe(&mut self, v: &[u8]) {
        self.sketch.increase(v);
        let freq = self.sketch.frequency(v);

        if let Some(pos) = self.elements.iter().position(|e| e.key == v) {
            self.elements[pos].count = freq;
            return;
        }

        if self.elements.len() < self.k {
            self.elements.push(Element {
                key: v.to_vec(),
                count: freq,
            });
            return;
        }

        // List is full: evict the weakest candidate if this one beats it.
        // min_by_key cannot fail here, len == k > 0.
        let (min_idx, min_count) = self
            .elements
            .iter()
            .enumerate()
            .map(|(i, e)| (i, e.count))
            .min_by_key(|&(_, count)| count)
            .unwrap();
        if freq > min_count {
            self.elements[min_idx] = Element {
                key: v.to_vec(),
                count: freq,
            };
        }
    }
}

impl Estimator for TopK {
    fn add(&mut self, v: &[u8]) {
        self.observe(v);
    }

    fn bytes(&self) -> usize {
        self.elements
            .iter()
            .map(|e| e.key.len() + mem::size_of::<u64>())
            .sum::<usize>()
            + self.sketch.bytes()
            + mem::size_of::<Self>()
    }

    fn encode(&mut self) -> Vec<u8> {
        let sketch_data = self.sketch.encode();

        let mut data = Vec::with_capacity(1 + 4 + 4 + 4 + sketch_data.len());
        data.put_u8(VERSION);
        data.put_u32(self.k as u32);
        data.put_u32(self.elements.len() as u32);
        for e in &self.elements {
            data.put_u32(e.key.len() as u32);
            data.extend_from_slice(&e.key);
            data.put_u64(e.count);
        }
        data.put_u32(sketch_data.len() as u32);
        data.extend_from_slice(&sketch_data);
        data
    }

    fn decode(data: &[u8]) -> anyhow::Result<Self> {
        let mut cursor = std::io::Cursor::new(data);
        if cursor.remaining() < 1 + 4 + 4 {
            return Err(anyhow!("top-k state truncated"));
        }

        let version = cursor.get_u8();
        if version != VERSION {
            return Err(anyhow!("unsupported top-k state version: {}", version));
        }

        let k = cursor.get_u32() as usize;
        if k == 0 {
            return Err(anyhow!("invalid top-k size: 0"));
        }

        let n = cursor.get_u32() as usize;
        if n > k {
            return Err(anyhow!("top-k holds {} elements for k {}", n, k));
        }

        let mut elements = Vec::with_capacity(n);
        for _ in 0..n {
            if cursor.remaining() < 4 {
                return Err(anyhow!("top-k state truncated"));
            }
            let key_len = cursor.get_u32() as usize;
            if cursor.remaining() < key_len + 8 {
                return Err(anyhow!("top-k state truncated"));
            }
            let mut key = vec![0; key_len];
            cursor.read_exact(&mut key)?;
            let count = cursor.get_u64();
            elements.push(Element { key, count });
        }

        if cursor.remaining() < 4 {
            return Err(anyhow!("top-k state truncated"));
        }
        let sketch_len = cursor.get_u32() as usize;
        if cursor.remaining() != sketch_len {
            return Err(anyhow!(
                "top-k sketch block mismatch: want {} bytes, have {}",
                sketch_len,
                cursor.remaining()
            ));
        }
        let pos = cursor.position() as usize;
        let sketch = CountMinLog::decode(&data[pos..])?;

        Ok(Self {
            k,
            sketch,
            elements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(topk: &mut TopK, value: &str, times: usize) {
        for _ in 0..times {
            topk.add(value.as_bytes());
        }
    }

    #[test]
    fn test_ranking_orders_by_count() -> anyhow::Result<()> {
        let mut topk = TopK::new(3)?;
        feed(&mut topk, "apple", 10);
        feed(&mut topk, "banana", 20);
        feed(&mut topk, "cherry", 5);
        feed(&mut topk, "date", 15);

        let top = topk.ranking();
        assert_eq!(top.len(), 3);
        assert_eq!(top[0], (b"banana".to_vec(), 20));
        assert_eq!(top[1], (b"date".to_vec(), 15));
        assert_eq!(top[2], (b"apple".to_vec(), 10));
        Ok(())
    }

    #[test]
    fn test_fewer_than_k_elements() -> anyhow::Result<()> {
        let mut topk = TopK::new(10)?;
        feed(&mut topk, "only", 2);

        let top = topk.ranking();
        assert_eq!(top, vec![(b"only".to_vec(), 2)]);
        Ok(())
    }

    #[test]
    fn test_ties_break_by_value() -> anyhow::Result<()> {
        let mut topk = TopK::new(4)?;
        feed(&mut topk, "wasp", 3);
        feed(&mut topk, "beast", 3);
        feed(&mut topk, "magneto", 3);

        let first = topk.ranking();
        assert_eq!(first[0].0, b"beast".to_vec());
        assert_eq!(first[1].0, b"magneto".to_vec());
        assert_eq!(first[2].0, b"wasp".to_vec());

        // Stable across repeated queries between writes.
        assert_eq!(topk.ranking(), first);
        Ok(())
    }

    #[test]
    fn test_heavy_hitter_evicts_weakest() -> anyhow::Result<()> {
        let mut topk = TopK::new(2)?;
        feed(&mut topk, "a", 5);
        feed(&mut topk, "b", 1);
        feed(&mut topk, "c", 9);

        let top = topk.ranking();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, b"c".to_vec());
        assert_eq!(top[1].0, b"a".to_vec());
        Ok(())
    }

    #[test]
    fn test_encode_round_trip() -> anyhow::Result<()> {
        let mut topk = TopK::new(5)?;
        feed(&mut topk, "apple", 4);
        feed(&mut topk, "banana", 7);

        let data = topk.encode();
        let mut decoded = TopK::decode(&data)?;
        assert_eq!(decoded.k(), 5);
        assert_eq!(decoded.ranking(), topk.ranking());

        // The decoded sketch keeps counting where it left off.
        decoded.add(b"banana");
        assert_eq!(decoded.ranking()[0], (b"banana".to_vec(), 8));
        Ok(())
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(TopK::decode(&[]).is_err());
        assert!(TopK::decode(&[9, 0, 0, 0, 1, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_zero_k_rejected() {
        assert!(TopK::new(0).is_err());
    }
}
