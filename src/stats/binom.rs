//! Exact binomial test.

use super::lgamma;

fn xlogy(x: f64, y: f64) -> f64 {
    if x == 0.0 && !y.is_nan() {
        0.0
    } else {
        x * y.ln()
    }
}

fn xlog1py(x: f64, y: f64) -> f64 {
    if x == 0.0 && !y.is_nan() {
        0.0
    } else {
        x * y.ln_1p()
    }
}

/// Binomial pmf `P(X = x)` in probability space.
pub fn binom_pmf(x: i64, n: i64, p: f64) -> f64 {
    let (xf, nf) = (x as f64, n as f64);
    let combiln = lgamma(nf + 1.0) - (lgamma(xf + 1.0) + lgamma(nf - xf + 1.0));
    (combiln + xlogy(xf, p) + xlog1py(nf - xf, -p)).exp()
}

/// Continued fraction for the regularized incomplete beta function,
/// Numerical Recipes style (Lentz's algorithm).
fn betacf(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 300;
    const EPS: f64 = 3e-14;
    const FPMIN: f64 = 1e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < FPMIN {
        d = FPMIN;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;

        if (del - 1.0).abs() < EPS {
            break;
        }
    }

    h
}

/// Regularized incomplete beta function `I_x(a, b)`.
pub fn inc_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        0.0
    } else if x >= 1.0 {
        1.0
    } else {
        let ln_bt =
            lgamma(a + b) - lgamma(a) - lgamma(b) + a * x.ln() + b * (1.0 - x).ln();
        let bt = ln_bt.exp();

        if x < (a + 1.0) / (a + b + 2.0) {
            bt * betacf(a, b, x) / a
        } else {
            1.0 - bt * betacf(b, a, 1.0 - x) / b
        }
    }
}

/// Binomial cdf `P(X <= x)`.
pub fn binom_cdf(x: f64, n: f64, p: f64) -> f64 {
    if x < 0.0 {
        0.0
    } else if x == n {
        1.0
    } else if x == 0.0 {
        (1.0 - p).powf(n - x)
    } else {
        inc_beta(n - x, x + 1.0, 1.0 - p)
    }
}

/// Binomial survival function `P(X > x)`.
pub fn binom_sf(x: f64, n: f64, p: f64) -> f64 {
    if x == n {
        0.0
    } else if x == 0.0 {
        if p < 0.01 {
            -((n - x) * (-p).ln_1p()).exp_m1()
        } else {
            1.0 - (1.0 - p).powf(n - x)
        }
    } else {
        inc_beta(x + 1.0, n - x, p)
    }
}

/// Two-sided exact binomial test of `x` successes in `n` trials.
///
/// The opposite tail collects all outcomes whose pmf is at most
/// `pmf(x) * (1 + 1e-7)`, matching the conventional two-sided rule.
pub fn binom_test(x: i64, n: i64, p: f64) -> Result<f64, anyhow::Error> {
    if !(0.0..=1.0).contains(&p) {
        anyhow::bail!("p should be in the range 0 <= p <= 1, got {}", p);
    }

    let d = binom_pmf(x, n, p);
    const REL_ERR: f64 = 1.0 + 1e-7;
    let d_rerr = d * REL_ERR;

    let (xf, nf) = (x as f64, n as f64);
    let expected = p * nf;

    let mut pval = 1.0;

    if xf < expected {
        let mut y = 0i64;
        let mut i = expected.ceil() as i64;
        while i <= n {
            if binom_pmf(i, n, p) <= d_rerr {
                y += 1;
            }
            i += 1;
        }
        pval = binom_cdf(xf, nf, p) + binom_sf(nf - y as f64, nf, p);
    } else if xf > expected {
        let mut y = 0i64;
        let mut i = 0i64;
        while i <= expected.floor() as i64 {
            if binom_pmf(i, n, p) <= d_rerr {
                y += 1;
            }
            i += 1;
        }
        pval = binom_cdf(y as f64 - 1.0, nf, p) + binom_sf(xf - 1.0, nf, p);
    }

    Ok(pval)
}

#[cfg(test)]
mod test {
    use float_cmp::approx_eq;

    use super::*;

    #[test]
    fn pmf_sums_to_one() {
        let total: f64 = (0..=30).map(|x| binom_pmf(x, 30, 0.3)).sum();
        assert!(approx_eq!(f64, 1.0, total, epsilon = 1e-10));
    }

    #[test]
    fn cdf_plus_sf_is_one() {
        for x in 0..20 {
            let c = binom_cdf(x as f64, 20.0, 0.4);
            let s = binom_sf(x as f64, 20.0, 0.4);
            assert!(approx_eq!(f64, 1.0, c + s, epsilon = 1e-10), "x = {}", x);
        }
    }

    #[test]
    fn inc_beta_symmetry() {
        // I_x(a, b) == 1 - I_{1-x}(b, a)
        let v = inc_beta(3.0, 5.0, 0.3);
        let w = 1.0 - inc_beta(5.0, 3.0, 0.7);
        assert!(approx_eq!(f64, v, w, epsilon = 1e-12));
    }

    #[rstest::rstest]
    // reference values from R binom.test(x, n, 0.5)$p.value
    #[case(10, 20, 0.5, 1.0)]
    #[case(3, 20, 0.5, 0.002576828)]
    #[case(17, 20, 0.5, 0.002576828)]
    #[case(0, 10, 0.5, 0.001953125)]
    fn binom_test_reference(
        #[case] x: i64,
        #[case] n: i64,
        #[case] p: f64,
        #[case] expected: f64,
    ) {
        let actual = binom_test(x, n, p).unwrap();
        assert!(
            approx_eq!(f64, expected, actual, epsilon = 1e-6),
            "x={} n={}: {} vs {}",
            x,
            n,
            expected,
            actual
        );
    }

    #[test]
    fn binom_test_symmetric_at_half() {
        let lo = binom_test(4, 30, 0.5).unwrap();
        let hi = binom_test(26, 30, 0.5).unwrap();
        assert!(approx_eq!(f64, lo, hi, epsilon = 1e-9));
    }

    #[test]
    fn binom_test_rejects_bad_p() {
        assert!(binom_test(1, 2, -0.1).is_err());
        assert!(binom_test(1, 2, 1.1).is_err());
    }
}
