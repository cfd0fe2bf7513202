//! Pure reducers over attribute sequences. All of them return 0 for an empty sequence.
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use crate::capture::containers::seconds_between;

pub fn total(values: &[f64]) -> f64 {
    values.iter().fold(0.0, |acc, v| acc + v)
}

pub fn max(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::max).unwrap_or(0.0)
}

pub fn min(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::min).unwrap_or(0.0)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    total(values) / values.len() as f64
}

/// Most frequent value; ties go to the smallest.
pub fn mode(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut best = (0.0, 0usize);
    let mut run = (f64::NAN, 0usize);
    for value in sorted {
        if value == run.0 {
            run.1 += 1;
        } else {
            run = (value, 1);
        }
        if run.1 > best.1 {
            best = run;
        }
    }
    best.0
}

/// Population variance.
pub fn variance(values: &[f64]) -> f64 {
    central_moment(values, 2)
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Biased sample skewness `m3 / m2^1.5`; 0 when every value is equal.
pub fn skewness(values: &[f64]) -> f64 {
    let m2 = central_moment(values, 2);
    if m2 <= f64::EPSILON {
        return 0.0;
    }
    central_moment(values, 3) / m2.powf(1.5)
}

/// Biased excess kurtosis `m4 / m2^2 - 3`; 0 when every value is equal.
pub fn kurtosis(values: &[f64]) -> f64 {
    let m2 = central_moment(values, 2);
    if m2 <= f64::EPSILON {
        return 0.0;
    }
    central_moment(values, 4) / (m2 * m2) - 3.0
}

/// Shannon entropy in bits of the distribution of `values`.
pub fn entropy<T: Eq + Hash + Clone>(values: impl IntoIterator<Item = T>) -> f64 {
    let counts = ranked(values);
    let total: usize = counts.iter().map(|(_, n)| n).sum();
    if total == 0 {
        return 0.0;
    }
    counts
        .iter()
        .map(|(_, n)| *n as f64 / total as f64)
        .fold(0.0, |acc, p| acc + p * (1.0 / p).log2())
}

/// Distinct values with their counts, most frequent first. Equal counts keep the order in
/// which the values were first seen.
pub fn ranked<T: Eq + Hash + Clone>(values: impl IntoIterator<Item = T>) -> Vec<(T, usize)> {
    let mut slots: HashMap<T, usize> = HashMap::new();
    let mut counts: Vec<(T, usize)> = Vec::new();
    for value in values {
        match slots.get(&value) {
            Some(&slot) => counts[slot].1 += 1,
            None => {
                slots.insert(value.clone(), counts.len());
                counts.push((value, 1));
            }
        }
    }
    // Stable, so first-seen order survives among equal counts.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

/// Share of `part` in `whole`, in percent; 0 when `whole` is 0.
pub fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

/// Standard deviation over mean; 0 when the mean is 0.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let mean = mean(values);
    if mean == 0.0 {
        return 0.0;
    }
    std_dev(values) / mean
}

/// Rate per second over `duration`; 0 when the duration is not positive.
pub fn rate(amount: f64, duration: f64) -> f64 {
    if duration > 0.0 {
        amount / duration
    } else {
        0.0
    }
}

/// Gaps in seconds between consecutive timestamps, after sorting. `[-1]` when there are
/// fewer than two timestamps.
pub fn time_deltas(mut timestamps: Vec<DateTime<Utc>>) -> Vec<f64> {
    if timestamps.len() < 2 {
        return vec![-1.0];
    }
    timestamps.sort();
    timestamps.windows(2).map(|pair| seconds_between(pair[0], pair[1])).collect()
}

fn central_moment(values: &[f64], order: i32) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = mean(values);
    values.iter().map(|v| (v - mean).powi(order)).sum::<f64>() / values.len() as f64
}
