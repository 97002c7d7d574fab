/// Largest sum of `size` consecutive values in `data`.
///
/// The window is clamped to the length of the data, so asking for a window
/// wider than the series yields the sum of the whole series. Used as the
/// peak sustained rate within a run: ramp-up and ramp-down slots do not drag
/// it down the way a whole-run average would.
///
/// ```text
/// maximal_window_sum(&[1, 3, 5, 2, 4], 1) == 5
/// maximal_window_sum(&[1, 3, 5, 2, 4], 2) == 8
/// ```
pub fn maximal_window_sum(data: &[u64], size: usize) -> u64 {
    let size = size.min(data.len());

    let mut best: u64 = data[..size].iter().sum();
    let mut curr = best;
    for i in 0..data.len() - size {
        curr = curr + data[i + size] - data[i];
        best = best.max(curr);
    }
    best
}

/// Sum of the `size` values nearest the median by magnitude.
///
/// Works on a sorted copy, so the time order of `data` is irrelevant: this
/// is a burst-resistant level, not a temporal median. The window is clamped
/// the same way as [`maximal_window_sum`].
pub fn median_window_sum(data: &[u64], size: usize) -> u64 {
    let size = size.min(data.len());

    let mut sorted = data.to_vec();
    sorted.sort_unstable();
    let offset = (sorted.len() - size) / 2;
    sorted[offset..offset + size].iter().sum()
}

/// Final rate estimate: the integer mean of the peak window and the median
/// window.
pub fn estimate(data: &[u64], window: usize) -> u64 {
    (maximal_window_sum(data, window) + median_window_sum(data, window)) / 2
}
