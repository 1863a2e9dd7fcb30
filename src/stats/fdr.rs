//! Benjamini-Hochberg false discovery rate adjustment.

/// Adjust a vector of p-values with the Benjamini-Hochberg step-up rule.
///
/// Entries equal to `-1.0` mark "no test was run"; they take part in
/// neither the test count `M` nor the ranking, and come back as `0.0`.  The
/// returned vector is aligned to the input indices.
pub fn adjust_fdr_bh(p: &[f64]) -> Vec<f64> {
    let n = p.len();

    let mut ix: Vec<usize> = (0..n).filter(|&i| p[i] != -1.0).collect();
    let m = ix.len();

    ix.sort_by(|&a, &b| p[a].partial_cmp(&p[b]).expect("NaN p-value"));

    let mut result = vec![0.0; n];

    // step-up: walk from the largest p-value down, carrying the running
    // minimum so the adjusted values are monotone in the input order
    let mut running = 1.0f64;
    for i in (0..m).rev() {
        let v = (m as f64 * p[ix[i]]) / (i + 1) as f64;
        running = running.min(v).min(1.0);
        result[ix[i]] = running;
    }

    result
}

#[cfg(test)]
mod test {
    use float_cmp::approx_eq;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_input() {
        assert_eq!(Vec::<f64>::new(), adjust_fdr_bh(&[]));
    }

    #[test]
    fn single_value_unchanged() {
        let out = adjust_fdr_bh(&[0.04]);
        assert!(approx_eq!(f64, 0.04, out[0], epsilon = 1e-12));
    }

    #[test]
    fn matches_r_p_adjust() {
        // R: p.adjust(c(0.02090890, 0.47487518, 0.62619172, 0.91510727,
        //               0.60456797, 0.52567835, 0.67903862, 0.06463231),
        //             method = "BH")
        let p = [
            0.02090890, 0.47487518, 0.62619172, 0.91510727, 0.60456797, 0.52567835,
            0.67903862, 0.06463231,
        ];
        let expected = [
            0.16727120, 0.77604374, 0.77604374, 0.91510727, 0.77604374, 0.77604374,
            0.77604374, 0.25852924,
        ];
        let actual = adjust_fdr_bh(&p);
        for (e, a) in expected.iter().zip(actual.iter()) {
            assert!(approx_eq!(f64, *e, *a, epsilon = 1e-6), "{} vs {}", e, a);
        }
    }

    #[test]
    fn monotone_for_sorted_input() {
        let p = [0.001, 0.0011, 0.02, 0.5, 0.9];
        let out = adjust_fdr_bh(&p);
        for w in out.windows(2) {
            assert!(w[0] <= w[1], "{:?}", out);
        }
    }

    #[test]
    fn sentinel_is_skipped_and_zero_filled() {
        let p = [0.01, -1.0, 0.04];
        let out = adjust_fdr_bh(&p);
        assert_eq!(0.0, out[1]);
        // M == 2, so the 0.01 entry adjusts to min(2*0.01/1, 2*0.04/2)
        assert!(approx_eq!(f64, 0.02, out[0], epsilon = 1e-12));
        assert!(approx_eq!(f64, 0.04, out[2], epsilon = 1e-12));
    }

    #[test]
    fn capped_at_one() {
        let out = adjust_fdr_bh(&[0.9, 0.95, 0.99]);
        assert!(out.iter().all(|&v| v <= 1.0));
    }
}
