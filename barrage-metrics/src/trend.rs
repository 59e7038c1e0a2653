use std::sync::Arc;

use hdrhistogram::Histogram;

use crate::{Error, Result};

/// Trend values are stored in the histogram at 1/1000 resolution.
const HIST_SCALE: f64 = 1000.0;

fn new_histogram() -> Result<Histogram<u64>> {
    // Auto-resizing, 3 significant digits: relative error stays within 0.1%.
    Histogram::<u64>::new(3).map_err(|err| Error::Histogram(format!("{err:?}")))
}

fn to_hist_units(v: f64) -> u64 {
    // Negative observations fold into the zero bucket of the approximate view.
    (v.max(0.0) * HIST_SCALE).round() as u64
}

/// Percentile over an ascending slice using linear interpolation between the closest ranks.
///
/// `p` is clamped to `[0, 100]`. For `[100, 200, 300, 400, 500]`, `p = 95` yields `480`.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = (p.clamp(0.0, 100.0) / 100.0) * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let lo_v = sorted[lo.min(last)];
    let hi_v = sorted[hi.min(last)];
    Some(lo_v + (hi_v - lo_v) * (rank - lo as f64))
}

/// Live accumulator for one trend series.
#[derive(Debug)]
pub(crate) struct TrendState {
    exact: Option<Vec<f64>>,
    /// Built once `exact` outgrows the retention cap.
    hist: Option<Histogram<u64>>,
    retention: usize,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl TrendState {
    pub(crate) fn new(retention: usize) -> Self {
        Self {
            exact: Some(Vec::new()),
            hist: None,
            retention,
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub(crate) fn record(&mut self, v: f64) -> Result<()> {
        if let Some(values) = self.exact.as_mut() {
            if values.len() < self.retention {
                values.push(v);
            } else {
                let mut hist = new_histogram()?;
                for x in values.iter() {
                    let _ = hist.record(to_hist_units(*x));
                }
                self.hist = Some(hist);
                self.exact = None;
            }
        }
        if let Some(hist) = self.hist.as_mut() {
            let _ = hist.record(to_hist_units(v));
        }

        self.count = self.count.saturating_add(1);
        self.sum += v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        Ok(())
    }

    /// Copies the state out; sorting happens after the caller releases the series lock.
    pub(crate) fn detach(&self) -> DetachedTrend {
        DetachedTrend {
            exact: self.exact.clone(),
            hist: self.hist.clone(),
            count: self.count,
            sum: self.sum,
            min: self.min,
            max: self.max,
        }
    }
}

pub(crate) struct DetachedTrend {
    exact: Option<Vec<f64>>,
    hist: Option<Histogram<u64>>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl DetachedTrend {
    pub(crate) fn finish(self) -> TrendSnapshot {
        let dist = match (self.exact, self.hist) {
            (Some(mut values), _) => {
                values.sort_unstable_by(f64::total_cmp);
                Distribution::Exact(Arc::from(values))
            }
            (None, Some(h)) => Distribution::Approx(Arc::new(h)),
            (None, None) => Distribution::Exact(Arc::from(Vec::new())),
        };

        TrendSnapshot {
            count: self.count,
            sum: self.sum,
            min: self.min,
            max: self.max,
            dist,
        }
    }
}

#[derive(Debug, Clone)]
enum Distribution {
    Exact(Arc<[f64]>),
    Approx(Arc<Histogram<u64>>),
}

/// Immutable distribution view of a trend series (or a merge of several).
#[derive(Debug, Clone)]
pub struct TrendSnapshot {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    dist: Distribution,
}

impl Default for TrendSnapshot {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            dist: Distribution::Exact(Arc::from(Vec::new())),
        }
    }
}

impl TrendSnapshot {
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut values: Vec<f64> = values.into_iter().collect();
        let mut out = Self::default();
        for &v in &values {
            out.count = out.count.saturating_add(1);
            out.sum += v;
            out.min = out.min.min(v);
            out.max = out.max.max(v);
        }
        values.sort_unstable_by(f64::total_cmp);
        out.dist = Distribution::Exact(Arc::from(values));
        out
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether percentiles are computed from every retained value.
    pub fn is_exact(&self) -> bool {
        matches!(self.dist, Distribution::Exact(_))
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn med(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }

        match &self.dist {
            Distribution::Exact(sorted) => percentile_sorted(sorted, p),
            Distribution::Approx(h) => {
                let q = p.clamp(0.0, 100.0) / 100.0;
                Some(h.value_at_quantile(q) as f64 / HIST_SCALE)
            }
        }
    }

    /// Combines several series into one distribution.
    ///
    /// The result stays exact only if every part is exact.
    pub fn merge<'a>(parts: impl IntoIterator<Item = &'a TrendSnapshot>) -> TrendSnapshot {
        let parts: Vec<&TrendSnapshot> = parts.into_iter().collect();
        match parts.as_slice() {
            [] => return TrendSnapshot::default(),
            [only] => return (*only).clone(),
            _ => {}
        }

        let mut out = TrendSnapshot::default();
        for p in &parts {
            out.count = out.count.saturating_add(p.count);
            out.sum += p.sum;
            out.min = out.min.min(p.min);
            out.max = out.max.max(p.max);
        }

        let first_approx = parts.iter().find_map(|p| match &p.dist {
            Distribution::Approx(h) => Some(h.clone()),
            Distribution::Exact(_) => None,
        });

        out.dist = match first_approx {
            None => {
                let mut values = Vec::with_capacity(out.count as usize);
                for p in &parts {
                    if let Distribution::Exact(v) = &p.dist {
                        values.extend_from_slice(v);
                    }
                }
                values.sort_unstable_by(f64::total_cmp);
                Distribution::Exact(Arc::from(values))
            }
            Some(first) => {
                // Grow a copy of the first histogram; it already carries its own values.
                let mut hist = first.as_ref().clone();
                let mut first_seen = false;
                for p in &parts {
                    match &p.dist {
                        Distribution::Exact(values) => {
                            for v in values.iter() {
                                let _ = hist.record(to_hist_units(*v));
                            }
                        }
                        Distribution::Approx(h) if !first_seen && Arc::ptr_eq(h, &first) => {
                            first_seen = true;
                        }
                        Distribution::Approx(h) => {
                            let _ = hist.add(h.as_ref());
                        }
                    }
                }
                Distribution::Approx(Arc::new(hist))
            }
        };

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn p95_interpolates_between_fourth_and_fifth_rank() {
        let t = TrendSnapshot::from_values([300.0, 100.0, 500.0, 200.0, 400.0]);
        assert_eq!(t.percentile(95.0), Some(480.0));
        assert_eq!(t.med(), Some(300.0));
        assert_eq!(t.percentile(0.0), Some(100.0));
        assert_eq!(t.percentile(100.0), Some(500.0));
        assert_eq!(t.avg(), Some(300.0));
    }

    #[test]
    fn empty_trend_has_no_stats() {
        let t = TrendSnapshot::default();
        assert!(t.is_empty());
        assert!(t.avg().is_none());
        assert!(t.min().is_none());
        assert!(t.max().is_none());
        assert!(t.percentile(90.0).is_none());
    }

    #[test]
    fn single_value_percentiles_are_that_value() {
        let t = TrendSnapshot::from_values([42.5]);
        assert_eq!(t.percentile(1.0), Some(42.5));
        assert_eq!(t.percentile(99.9), Some(42.5));
    }

    #[test]
    fn retention_overflow_switches_to_histogram() {
        let mut state = TrendState::new(10);
        for v in 1..=1000 {
            state
                .record(v as f64)
                .unwrap_or_else(|e| panic!("record: {e}"));
        }
        let t = state.detach().finish();

        assert!(!t.is_exact());
        assert_eq!(t.count(), 1000);
        assert_eq!(t.min(), Some(1.0));
        assert_eq!(t.max(), Some(1000.0));

        let p95 = t.percentile(95.0).unwrap_or_else(|| panic!("expected p95"));
        assert!(approx_eq(p95, 950.0, 950.0 * 0.002), "p95={p95}");
    }

    #[test]
    fn merge_of_exact_parts_stays_exact() {
        let a = TrendSnapshot::from_values([100.0, 300.0, 500.0]);
        let b = TrendSnapshot::from_values([200.0, 400.0]);
        let m = TrendSnapshot::merge([&a, &b]);

        assert!(m.is_exact());
        assert_eq!(m.count(), 5);
        assert_eq!(m.percentile(95.0), Some(480.0));
        assert_eq!(m.min(), Some(100.0));
        assert_eq!(m.max(), Some(500.0));
    }

    #[test]
    fn merge_with_approx_part_is_approx() {
        let mut state = TrendState::new(1);
        for v in [10.0, 20.0] {
            state.record(v).unwrap_or_else(|e| panic!("record: {e}"));
        }
        let approx = state.detach().finish();
        let exact = TrendSnapshot::from_values([30.0]);

        let m = TrendSnapshot::merge([&approx, &exact, &approx]);
        assert!(!m.is_exact());
        assert_eq!(m.count(), 5);
        assert_eq!(m.min(), Some(10.0));
        let max = m.percentile(100.0).unwrap_or_else(|| panic!("expected max"));
        assert!(approx_eq(max, 30.0, 0.1), "max={max}");
    }
}
