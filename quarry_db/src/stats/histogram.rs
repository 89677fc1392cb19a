//! Equi-width histograms over single fields.

use granite::tuple::Op;

/// A fixed-width histogram over an integer field.
///
/// The value range `[min, max]` is split into equal-width buckets, the last
/// bucket absorbing the remainder of the division. Space and estimation time
/// are constant in the number of values added.
#[derive(Debug, Clone)]
pub struct IntHistogram {
    buckets: Vec<u64>,
    min: i64,
    max: i64,
    width: i64,
    total: u64,
}

impl IntHistogram {
    /// Creates a histogram of at most `buckets` buckets over `[min, max]`.
    /// A range narrower than the bucket count gets one bucket per value.
    pub fn new(buckets: usize, min: i32, max: i32) -> Self {
        let min = min as i64;
        let max = max as i64;
        let span = (max - min + 1).max(1);
        let buckets = buckets.max(1).min(span as usize);
        Self {
            buckets: vec![0; buckets],
            min,
            max,
            width: span / buckets as i64,
            total: 0,
        }
    }

    fn index_of(&self, v: i64) -> usize {
        (((v - self.min) / self.width) as usize).min(self.buckets.len() - 1)
    }

    fn bucket_width(&self, index: usize) -> i64 {
        if index < self.buckets.len() - 1 {
            self.width
        } else {
            (self.max - self.min + 1) - self.width * (self.buckets.len() as i64 - 1)
        }
    }

    pub fn add_value(&mut self, v: i32) {
        let idx = self.index_of(v as i64);
        self.buckets[idx] += 1;
        self.total += 1;
    }

    pub fn total_values(&self) -> u64 {
        self.total
    }

    /// Estimated fraction of added values satisfying `value op v`, in
    /// `[0, 1]`.
    pub fn estimate_selectivity(&self, op: Op, v: i32) -> f64 {
        self.estimate(op, v as i64)
    }

    fn estimate(&self, op: Op, v: i64) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        match op {
            Op::Eq => {
                if v < self.min || v > self.max {
                    return 0.0;
                }
                let index = self.index_of(v);
                self.buckets[index] as f64 / self.bucket_width(index) as f64 / self.total as f64
            }
            Op::Gt => {
                if v < self.min {
                    return 1.0;
                }
                if v >= self.max {
                    return 0.0;
                }
                let index = self.index_of(v);
                let mut satisfying: f64 =
                    self.buckets[index + 1..].iter().map(|&c| c as f64).sum();
                let right = index as i64 * self.width + self.bucket_width(index);
                satisfying += self.buckets[index] as f64 * (right - v) as f64
                    / self.bucket_width(index) as f64;
                (satisfying / self.total as f64).clamp(0.0, 1.0)
            }
            Op::Lt => {
                if v <= self.min {
                    return 0.0;
                }
                if v > self.max {
                    return 1.0;
                }
                let index = self.index_of(v);
                let mut satisfying: f64 = self.buckets[..index].iter().map(|&c| c as f64).sum();
                let left = index as i64 * self.width + 1;
                satisfying += self.buckets[index] as f64 * (v - left) as f64
                    / self.bucket_width(index) as f64;
                (satisfying / self.total as f64).clamp(0.0, 1.0)
            }
            Op::Le => self.estimate(Op::Lt, v + 1),
            Op::Ge => self.estimate(Op::Gt, v - 1),
            Op::Ne => 1.0 - self.estimate(Op::Eq, v),
            // Pattern matching has no meaning over integers.
            Op::Like => 0.0,
        }
    }
}

/// A histogram over a string field.
///
/// Strings are mapped onto a bounded integer domain by packing their first
/// four bytes, and an `IntHistogram` does the rest. The mapping is monotone
/// for ASCII, so range estimates stay meaningful.
#[derive(Debug, Clone)]
pub struct StringHistogram {
    inner: IntHistogram,
}

const MIN_HASH: i32 = 0;
const MAX_HASH: i32 = i32::from_be_bytes([0, b'z', b'z', b'z']) * 256 + b'z' as i32;

impl StringHistogram {
    pub fn new(buckets: usize) -> Self {
        Self {
            inner: IntHistogram::new(buckets, MIN_HASH, MAX_HASH),
        }
    }

    fn string_to_int(s: &str) -> i32 {
        let mut v: i64 = 0;
        for (i, b) in s.bytes().take(4).enumerate() {
            v += (b as i64) << ((3 - i) * 8);
        }
        v.clamp(MIN_HASH as i64, MAX_HASH as i64) as i32
    }

    pub fn add_value(&mut self, s: &str) {
        self.inner.add_value(Self::string_to_int(s));
    }

    pub fn total_values(&self) -> u64 {
        self.inner.total_values()
    }

    /// Estimated fraction of added strings satisfying `value op s`. `Like`
    /// is estimated as equality on the hashed prefix.
    pub fn estimate_selectivity(&self, op: Op, s: &str) -> f64 {
        let op = if op == Op::Like { Op::Eq } else { op };
        self.inner.estimate_selectivity(op, Self::string_to_int(s))
    }
}
