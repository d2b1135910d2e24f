use std::cmp::Ordering;

/// Rounds to 3 decimal places. For display only; comparisons use raw values.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Index of the extreme value in `values` under `better`, where ties go to the
/// earliest entry. Callers sort `values` by group key first so the smallest key
/// wins a tie.
pub fn pick_extreme<T>(values: &[T], metric: impl Fn(&T) -> f64, better: Ordering) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, v) in values.iter().enumerate() {
        let m = metric(v);
        if m.is_nan() {
            continue;
        }
        match best {
            None => best = Some(i),
            Some(b) => {
                if m.partial_cmp(&metric(&values[b])) == Some(better) {
                    best = Some(i);
                }
            }
        }
    }
    best
}
