//! Largest-Triangle-Three-Buckets downsampling.
//!
//! Keeps the first and last samples, splits the interior into equal-width
//! buckets and keeps from each bucket the sample spanning the largest triangle
//! with the previously kept sample and the centroid of the following bucket.

/// Default upper bound on rendered points.
pub const DEFAULT_THRESHOLD: usize = 2000;

fn finite(ys: &[Option<f64>], j: usize) -> Option<f64> {
    ys[j].filter(|y| y.is_finite())
}

/// Indices of the samples LTTB keeps, ascending.
///
/// Returns every index when `timestamps.len() <= threshold` or `threshold < 3`.
/// Samples with a null or non-finite value are never chosen from the interior;
/// a bucket without any finite value contributes nothing.
pub fn lttb_indices(timestamps: &[i64], ys: &[Option<f64>], threshold: usize) -> Vec<usize> {
    let n = timestamps.len().min(ys.len());
    if n <= threshold || threshold < 3 {
        return (0..n).collect();
    }

    let buckets = threshold - 2;
    let bucket_size = (n - 2) as f64 / buckets as f64;
    // Boundary k opens bucket k; boundary `buckets` is the last sample and
    // boundary `buckets + 1` is one past it.
    let boundary = |k: usize| -> usize {
        if k >= buckets {
            n - 1 + (k - buckets)
        } else {
            ((k as f64 * bucket_size).floor() as usize + 1).min(n - 1)
        }
    };

    let mut kept = Vec::with_capacity(threshold);
    kept.push(0);
    let mut a = 0usize;

    for i in 0..buckets {
        let (start, end) = (boundary(i), boundary(i + 1));
        let (next_start, next_end) = (end, boundary(i + 2));

        let ax = timestamps[a] as f64;
        let prev_y = finite(ys, a);

        let count = next_end - next_start;
        let avg_x = if count > 0 {
            timestamps[next_start..next_end]
                .iter()
                .map(|&t| t as f64)
                .sum::<f64>()
                / count as f64
        } else {
            timestamps[n - 1] as f64
        };
        let (sum_y, finite_count) = (next_start..next_end)
            .filter_map(|j| finite(ys, j))
            .fold((0.0, 0usize), |(s, c), y| (s + y, c + 1));
        let avg_y = if finite_count > 0 {
            Some(sum_y / finite_count as f64)
        } else {
            None
        };

        let (ay, cy) = match (prev_y, avg_y) {
            (Some(ay), Some(cy)) => (ay, cy),
            (Some(ay), None) => (ay, ay),
            (None, Some(cy)) => (cy, cy),
            (None, None) => (0.0, 0.0),
        };
        let cx = avg_x;

        let mut max_area = -1.0f64;
        let mut max_idx = None;
        for j in start..end {
            let Some(by) = finite(ys, j) else {
                continue;
            };
            let bx = timestamps[j] as f64;
            let area = (ax * (by - cy) + bx * (cy - ay) + cx * (ay - by)).abs() * 0.5;
            if area > max_area {
                max_area = area;
                max_idx = Some(j);
            }
        }

        if let Some(j) = max_idx {
            kept.push(j);
            a = j;
        }
    }

    kept.push(n - 1);
    kept
}

/// Downsample parallel `(timestamps, values)` columns.
pub fn lttb(
    timestamps: &[i64],
    ys: &[Option<f64>],
    threshold: usize,
) -> (Vec<i64>, Vec<Option<f64>>) {
    let indices = lttb_indices(timestamps, ys, threshold);
    let xs = indices.iter().map(|&i| timestamps[i]).collect();
    let vs = indices.iter().map(|&i| ys[i]).collect();
    (xs, vs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn wave(n: usize) -> (Vec<i64>, Vec<Option<f64>>) {
        let xs: Vec<i64> = (0..n as i64).map(|i| i * 10).collect();
        let ys = (0..n)
            .map(|i| Some((i as f64 * 0.05).sin() * 500.0 + 800.0))
            .collect();
        (xs, ys)
    }

    #[test]
    fn test_small_input_returned_unchanged() {
        let (xs, ys) = wave(50);
        let (out_x, out_y) = lttb(&xs, &ys, 50);

        assert_eq!(out_x, xs);
        assert_eq!(out_y, ys);
    }

    #[test]
    fn test_output_length_equals_threshold() {
        for (n, threshold) in [(101, 10), (2500, 2000), (10_000, 3), (7, 5)] {
            let (xs, ys) = wave(n);
            let (out_x, _) = lttb(&xs, &ys, threshold);
            assert_eq!(out_x.len(), threshold, "n={} threshold={}", n, threshold);
        }
    }

    #[test]
    fn test_endpoints_preserved() {
        let (xs, ys) = wave(1234);
        let (out_x, out_y) = lttb(&xs, &ys, 100);

        assert_eq!(out_x[0], xs[0]);
        assert_eq!(out_y[0], ys[0]);
        assert_eq!(*out_x.last().unwrap(), *xs.last().unwrap());
        assert_eq!(*out_y.last().unwrap(), *ys.last().unwrap());
    }

    #[test]
    fn test_output_strictly_increasing() {
        let (xs, ys) = wave(5000);
        let (out_x, _) = lttb(&xs, &ys, 321);

        assert!(out_x.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_spike_survives_where_stride_would_drop_it() {
        let n = 1000;
        let xs: Vec<i64> = (0..n as i64).collect();
        let mut ys = vec![Some(0.0); n];
        ys[503] = Some(1000.0);

        let (out_x, out_y) = lttb(&xs, &ys, 50);

        assert!(out_x.contains(&503));
        assert!(out_y.contains(&Some(1000.0)));
        // A fixed stride of n / threshold would skip it
        assert!(!(0..n).step_by(n / 50).any(|i| i == 503));
    }

    #[test]
    fn test_ties_keep_first_index() {
        let xs: Vec<i64> = (0..10).collect();
        let ys = vec![Some(5.0); 10];

        assert_eq!(lttb_indices(&xs, &ys, 4), vec![0, 1, 5, 9]);
    }

    #[test]
    fn test_null_values_not_selected() {
        let xs: Vec<i64> = (0..10).collect();
        let mut ys: Vec<Option<f64>> = (0..10).map(|i| Some(i as f64)).collect();
        ys[1] = None;
        ys[2] = Some(f64::NAN);

        let indices = lttb_indices(&xs, &ys, 4);

        assert!(!indices.contains(&1));
        assert!(!indices.contains(&2));
        assert_eq!(indices.len(), 4);
    }

    #[test]
    fn test_all_null_bucket_is_skipped() {
        let xs: Vec<i64> = (0..10).collect();
        let mut ys: Vec<Option<f64>> = vec![Some(1.0); 10];
        for y in ys.iter_mut().take(5).skip(1) {
            *y = None;
        }

        let indices = lttb_indices(&xs, &ys, 4);

        assert_eq!(indices.first(), Some(&0));
        assert_eq!(indices.last(), Some(&9));
        assert_eq!(indices.len(), 3);
    }

    #[test]
    fn test_threshold_below_three_returns_input() {
        let (xs, ys) = wave(20);
        assert_eq!(lttb_indices(&xs, &ys, 2).len(), 20);
    }
}
