/// Running summary of a sample series without keeping the samples.
///
/// Mean and variance use Welford's online update so long timing series in
/// microseconds do not lose precision the way a raw sum-of-squares would.
#[derive(Debug, Clone, Default)]
pub struct IncrementalStatistics {
    count: u64,
    min: f64,
    max: f64,
    sum: f64,
    mean: f64,
    m2: f64,
}

impl IncrementalStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_value(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum += value;

        let n = self.count as f64;
        let delta = value - self.mean;
        self.mean += delta / n;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    #[inline]
    pub fn count(&self) -> u64 { self.count }

    #[inline]
    pub fn is_empty(&self) -> bool { self.count == 0 }

    #[inline]
    pub fn sum(&self) -> f64 { self.sum }

    pub fn min(&self) -> f64 {
        if self.is_empty() { 0.0 } else { self.min }
    }

    pub fn max(&self) -> f64 {
        if self.is_empty() { 0.0 } else { self.max }
    }

    pub fn mean(&self) -> f64 {
        if self.is_empty() { 0.0 } else { self.mean }
    }

    /// Sample variance (n - 1 denominator).
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / (self.count as f64 - 1.0)).max(0.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(values: &[f64]) -> (f64, f64, f64, f64) {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        (mean, var, min, max)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn empty_series_reads_as_zero() {
        let s = IncrementalStatistics::new();
        assert_eq!(s.count(), 0);
        assert_eq!(s.mean(), 0.0);
        assert_eq!(s.min(), 0.0);
        assert_eq!(s.max(), 0.0);
        assert_eq!(s.variance(), 0.0);
        assert_eq!(s.std_dev(), 0.0);
    }

    #[test]
    fn single_value_has_zero_spread() {
        let mut s = IncrementalStatistics::new();
        s.add_value(1460.0);
        assert_eq!(s.mean(), 1460.0);
        assert_eq!(s.min(), 1460.0);
        assert_eq!(s.max(), 1460.0);
        assert_eq!(s.std_dev(), 0.0);
    }

    #[test]
    fn matches_two_pass_computation() {
        let series: Vec<Vec<f64>> = vec![
            vec![0.0, 0.0, 1460.0, 52.0, 1460.0, 0.0, 517.0],
            vec![1_000_000.0, 2_100_000.0, 500_000.0, 120_000_000.0, 3.0],
            vec![4_294_967_295.0, 4_294_967_294.0, 4_294_967_000.0, 1.0],
            vec![-5.0, 5.0],
        ];

        for values in series {
            let mut s = IncrementalStatistics::new();
            values.iter().for_each(|v| s.add_value(*v));
            let (mean, var, min, max) = batch(&values);

            assert_eq!(s.count(), values.len() as u64);
            assert!(close(s.mean(), mean), "mean {} vs {}", s.mean(), mean);
            assert!(close(s.variance(), var), "variance {} vs {}", s.variance(), var);
            assert!(close(s.std_dev(), var.sqrt()));
            assert_eq!(s.min(), min);
            assert_eq!(s.max(), max);
            assert!(close(s.sum(), values.iter().sum()));
        }
    }
}
