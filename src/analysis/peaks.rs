//! Spectral peak detection
//!
//! Local maxima of a dB power spectrum that clear an absolute threshold and sit far enough
//! away from any stronger peak.

use std::cmp::Ordering;

/// A detected spectral peak
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakRecord {
    /// Offset from the center frequency in Hz
    pub frequency_offset_hz: f64,
    /// Power in dB
    pub power_db: f64,
}

impl PeakRecord {
    /// Strongest first, then lowest offset first
    pub fn rank(a: &Self, b: &Self) -> Ordering {
        b.power_db
            .total_cmp(&a.power_db)
            .then(a.frequency_offset_hz.total_cmp(&b.frequency_offset_hz))
    }
}

/// Minimum spacing between two reported peaks
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PeakSpacing {
    /// Spacing in FFT bins
    Bins(usize),
    /// Spacing in Hz, converted to bins with the bin width of the spectrum being searched
    Hz(f64),
}

impl PeakSpacing {
    pub fn to_bins(self, bin_width_hz: f64) -> usize {
        match self {
            PeakSpacing::Bins(n) => n.max(1),
            PeakSpacing::Hz(hz) if bin_width_hz > 0.0 => {
                ((hz / bin_width_hz).ceil() as usize).max(1)
            }
            PeakSpacing::Hz(_) => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeakDetector {
    /// Absolute height a peak must reach, in dB
    pub threshold_db: f64,
    pub min_distance: PeakSpacing,
}

impl Default for PeakDetector {
    fn default() -> Self {
        Self {
            threshold_db: -60.0,
            min_distance: PeakSpacing::Bins(1000),
        }
    }
}

impl PeakDetector {
    pub fn with_threshold(mut self, threshold_db: f64) -> Self {
        self.threshold_db = threshold_db;
        self
    }

    pub fn with_min_distance_bins(mut self, bins: usize) -> Self {
        self.min_distance = PeakSpacing::Bins(bins);
        self
    }

    pub fn with_min_distance_hz(mut self, hz: f64) -> Self {
        self.min_distance = PeakSpacing::Hz(hz);
        self
    }

    /// Find peaks in a power spectrum whose bin `k` sits at `k * bin_width_hz`
    pub fn find(&self, power_db: &[f64], bin_width_hz: f64) -> Vec<PeakRecord> {
        let candidates: Vec<usize> = local_maxima(power_db)
            .into_iter()
            .filter(|&i| power_db[i] >= self.threshold_db)
            .collect();
        let distance = self.min_distance.to_bins(bin_width_hz);
        let mut peaks: Vec<PeakRecord> = select_by_distance(&candidates, power_db, distance)
            .into_iter()
            .map(|i| PeakRecord {
                frequency_offset_hz: i as f64 * bin_width_hz,
                power_db: power_db[i],
            })
            .collect();
        peaks.sort_by(PeakRecord::rank);
        peaks
    }
}

/// Indices of local maxima. Flat tops count once, at their middle sample. The first and last
/// samples are never maxima.
pub fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut maxima = Vec::new();
    if x.len() < 3 {
        return maxima;
    }
    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                maxima.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    maxima
}

/// Walk candidates from strongest to weakest, dropping anything closer than `distance` bins
/// to a peak that's already been kept. Returns the survivors in index order.
fn select_by_distance(candidates: &[usize], power_db: &[f64], distance: usize) -> Vec<usize> {
    if distance <= 1 {
        return candidates.to_vec();
    }
    let mut keep = vec![true; candidates.len()];
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    // Strongest first, equal heights favor the lower bin
    order.sort_by(|&a, &b| {
        power_db[candidates[b]]
            .total_cmp(&power_db[candidates[a]])
            .then(a.cmp(&b))
    });
    for &j in &order {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && candidates[j] - candidates[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < candidates.len() && candidates[k] - candidates[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }
    candidates
        .iter()
        .zip(keep)
        .filter_map(|(&c, k)| k.then_some(c))
        .collect()
}
