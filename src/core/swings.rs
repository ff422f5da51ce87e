use serde::{Deserialize, Serialize};

use crate::models::SwingType;

/// A local extremum of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pivot {
    pub index: usize,
    pub value: f64,
    pub kind: SwingType,
}

/// Finds swing highs or lows in `values`.
///
/// Bar `i` is a pivot when it is the extremum of `i - radius ..= i + radius`:
/// strictly beyond every bar to its left and at least equal to every bar to
/// its right, so a flat top yields only its first bar. Windows touching an
/// undefined or non-finite value are skipped. Pivots of the same kind closer
/// than `min_distance` bars are collapsed to the more extreme one.
pub fn find_pivots(
    values: &[Option<f64>],
    radius: usize,
    kind: SwingType,
    min_distance: usize,
) -> Vec<Pivot> {
    let len = values.len();
    if radius == 0 || len <= radius * 2 {
        return Vec::new();
    }

    let beyond = |a: f64, b: f64| match kind {
        SwingType::High => a > b,
        SwingType::Low => a < b,
    };

    let mut pivots: Vec<Pivot> = Vec::new();
    'bars: for i in radius..(len - radius) {
        let Some(current) = values[i].filter(|v| v.is_finite()) else {
            continue;
        };

        for j in (i - radius)..=(i + radius) {
            if j == i {
                continue;
            }
            let Some(other) = values[j].filter(|v| v.is_finite()) else {
                continue 'bars;
            };
            let ok = if j < i {
                beyond(current, other)
            } else {
                !beyond(other, current)
            };
            if !ok {
                continue 'bars;
            }
        }

        let pivot = Pivot {
            index: i,
            value: current,
            kind,
        };

        match pivots.last_mut() {
            Some(last) if i - last.index < min_distance => {
                if beyond(current, last.value) {
                    *last = pivot;
                }
            }
            _ => pivots.push(pivot),
        }
    }

    pivots
}

/// Same as [`find_pivots`] for a fully defined series.
pub fn find_price_pivots(
    values: &[f64],
    radius: usize,
    kind: SwingType,
    min_distance: usize,
) -> Vec<Pivot> {
    let wrapped: Vec<Option<f64>> = values.iter().copied().map(Some).collect();
    find_pivots(&wrapped, radius, kind, min_distance)
}

/// Pivot nearest to `index` within `max_offset` bars; ties go to the later one.
pub fn nearest_pivot(pivots: &[Pivot], index: usize, max_offset: usize) -> Option<Pivot> {
    pivots
        .iter()
        .filter(|p| p.index.abs_diff(index) <= max_offset)
        .min_by_key(|p| (p.index.abs_diff(index), std::cmp::Reverse(p.index)))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave() -> Vec<f64> {
        // peaks at 3 and 11, troughs at 7 and 15
        vec![
            1.0, 2.0, 3.0, 5.0, 3.0, 2.0, 1.5, 0.5, 1.5, 2.0, 3.0, 6.0, 3.0, 2.0, 1.0, 0.2, 1.0, 2.0,
            3.0,
        ]
    }

    #[test]
    fn finds_highs_and_lows() {
        let v = wave();
        let highs = find_price_pivots(&v, 2, SwingType::High, 0);
        assert_eq!(highs.iter().map(|p| p.index).collect::<Vec<_>>(), vec![3, 11]);
        assert_eq!(highs[1].value, 6.0);

        let lows = find_price_pivots(&v, 2, SwingType::Low, 0);
        assert_eq!(lows.iter().map(|p| p.index).collect::<Vec<_>>(), vec![7, 15]);
        assert!(lows.iter().all(|p| p.kind == SwingType::Low));
    }

    #[test]
    fn edges_need_full_window() {
        // Global max at the last bar is not a confirmed pivot yet
        let v = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert!(find_price_pivots(&v, 2, SwingType::High, 0).is_empty());
        assert!(find_price_pivots(&v, 3, SwingType::High, 0).is_empty());
    }

    #[test]
    fn plateau_yields_first_bar() {
        let v = vec![1.0, 2.0, 5.0, 5.0, 2.0, 1.0, 0.5];
        let highs = find_price_pivots(&v, 2, SwingType::High, 0);
        assert_eq!(highs.len(), 1);
        assert_eq!(highs[0].index, 2);
    }

    #[test]
    fn undefined_values_break_windows() {
        let mut v: Vec<Option<f64>> = wave().into_iter().map(Some).collect();
        v[4] = None;
        let highs = find_pivots(&v, 2, SwingType::High, 0);
        assert_eq!(highs.iter().map(|p| p.index).collect::<Vec<_>>(), vec![11]);
    }

    #[test]
    fn min_distance_keeps_more_extreme() {
        let v = vec![0.0, 1.0, 4.0, 1.0, 5.0, 1.0, 0.0, 0.0];
        let close = find_price_pivots(&v, 1, SwingType::High, 0);
        assert_eq!(close.len(), 2);
        let merged = find_price_pivots(&v, 1, SwingType::High, 3);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].index, 4);
    }

    #[test]
    fn nearest_pivot_within_offset() {
        let highs = find_price_pivots(&wave(), 2, SwingType::High, 0);
        assert_eq!(nearest_pivot(&highs, 12, 2).map(|p| p.index), Some(11));
        assert_eq!(nearest_pivot(&highs, 7, 2), None);
    }
}
