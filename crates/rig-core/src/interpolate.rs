//! Pure run-planner math.
//!
//! A batch sweeps its parameters linearly across the configured number of
//! runs: run 1 sits at one end of the `[min, max]` range, run `total` at the
//! other. Polarity alternates in blocks of `change_step` runs. Both are
//! pure functions of the 1-based run counter so they can be tested in
//! isolation.

/// Linear sweep value for run `counter` of `total`.
///
/// `step = (max - min) / max(1, total - 1)`; sweeps `max → min` when
/// `max_to_min`, `min → max` otherwise. A single-run batch yields the
/// starting endpoint for any counter (divide-by-zero guard); counters are
/// clamped into `1..=total`.
pub fn sweep_value(counter: u32, total: u32, min: i32, max: i32, max_to_min: bool) -> i32 {
    let total = total.max(1);
    let i = counter.clamp(1, total);
    let step = f64::from(max - min) / f64::from((total - 1).max(1));
    let offset = step * f64::from(i - 1);
    let value = if max_to_min {
        f64::from(max) - offset
    } else {
        f64::from(min) + offset
    };
    value.round() as i32
}

/// Polarity of run `counter`: blocks of `change_step` runs alternate,
/// starting positive when `start_plus`.
pub fn plus_polarity(counter: u32, change_step: u32, start_plus: bool) -> bool {
    let change_step = change_step.max(1);
    let block = (counter.max(1) - 1) / change_step;
    !((block % 2 == 0) ^ start_plus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_endpoints_min_to_max() {
        assert_eq!(sweep_value(1, 10, 4000, 7000, false), 4000);
        assert_eq!(sweep_value(10, 10, 4000, 7000, false), 7000);
    }

    #[test]
    fn sweep_endpoints_max_to_min() {
        assert_eq!(sweep_value(1, 10, 4000, 7000, true), 7000);
        assert_eq!(sweep_value(10, 10, 4000, 7000, true), 4000);
    }

    #[test]
    fn sweep_interior_is_linear() {
        // step = 3000 / 9
        assert_eq!(sweep_value(4, 10, 4000, 7000, false), 5000);
        assert_eq!(sweep_value(7, 10, 4000, 7000, true), 5000);
    }

    #[test]
    fn single_run_batch_guards_divide_by_zero() {
        for counter in [1, 2, 5, 100] {
            assert_eq!(sweep_value(counter, 1, 4000, 7000, false), 4000);
            assert_eq!(sweep_value(counter, 1, 4000, 7000, true), 7000);
        }
    }

    #[test]
    fn counter_out_of_range_is_clamped() {
        assert_eq!(sweep_value(0, 10, 4000, 7000, false), 4000);
        assert_eq!(sweep_value(99, 10, 4000, 7000, false), 7000);
    }

    #[test]
    fn polarity_alternates_in_blocks() {
        // change_step = 1: strict alternation
        assert!(plus_polarity(1, 1, true));
        assert!(!plus_polarity(2, 1, true));
        assert!(plus_polarity(3, 1, true));

        // change_step = 2: pairs
        assert!(plus_polarity(1, 2, true));
        assert!(plus_polarity(2, 2, true));
        assert!(!plus_polarity(3, 2, true));
        assert!(!plus_polarity(4, 2, true));
        assert!(plus_polarity(5, 2, true));
    }

    #[test]
    fn polarity_respects_starting_sign() {
        assert!(!plus_polarity(1, 1, false));
        assert!(plus_polarity(2, 1, false));
    }

    #[test]
    fn polarity_zero_change_step_treated_as_one() {
        assert!(plus_polarity(1, 0, true));
        assert!(!plus_polarity(2, 0, true));
    }
}
