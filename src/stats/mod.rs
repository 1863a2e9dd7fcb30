//! Numerical building blocks for the screen statistics.
//!
//! Everything here works in natural log space unless stated otherwise.  The
//! implementations follow the classic Catherine Loader saddle point
//! decomposition of the binomial pmf so that p-values stay stable for the
//! very large counts a genome-wide screen produces.

use std::sync::OnceLock;

pub mod binom;
pub mod fdr;
pub mod fisher;

const LN_2PI: f64 = 1.837877066409345483560659472811;

/// Log-gamma via the Lanczos approximation (g = 7, 9 terms).
///
/// Accurate to ~15 significant digits for positive arguments, which is all
/// the statistics below need.
pub fn lgamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.99999999999980993,
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];

    if x < 0.5 {
        // reflection formula
        let pi = std::f64::consts::PI;
        (pi / (pi * x).sin()).ln() - lgamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut a = COEFFS[0];
        let t = x + 7.5;
        for (i, &c) in COEFFS.iter().enumerate().skip(1) {
            a += c / (x + i as f64);
        }
        0.5 * LN_2PI + (x + 0.5) * t.ln() - t + a.ln()
    }
}

/// Deviance term `x * log(x / np) + np - x`.
///
/// Computed via the Taylor series of `log((1 + y) / (1 - y))` with
/// `y = (x - np) / (x + np)`, which stays stable when `x` is close to `np`.
/// The series terminates once a partial sum no longer changes under IEEE-754
/// doubles, with a hard guard at 1000 terms.
pub fn bd0(x: f64, np: f64) -> f64 {
    let y = (x - np) / (x + np);
    let y2 = y * y;
    let mut yk = y;
    let mut s = 2.0 * y;

    for n in 1..1000 {
        yk *= y2;
        let t = 2.0 * yk / (2 * n + 1) as f64;
        let s1 = s + t;
        if s1 == s {
            break;
        }
        s = s1;
    }

    x * s + np - x
}

fn stirling_error_exact(n: u64) -> f64 {
    let n = n as f64;
    lgamma(n + 1.0) - (n + 0.5) * n.ln() + n - 0.5 * LN_2PI
}

/// Stirling series error `log(n!) - log(sqrt(2 pi n) (n/e)^n)`.
///
/// Tabulated for `n <= 15`; the asymptotic series with size-selected
/// correction terms otherwise.
pub fn stirling_error(n: u64) -> f64 {
    static TABLE: OnceLock<[f64; 16]> = OnceLock::new();
    let table = TABLE.get_or_init(|| {
        let mut t = [0.0; 16];
        for (i, v) in t.iter_mut().enumerate().skip(1) {
            *v = stirling_error_exact(i as u64);
        }
        t
    });

    if n <= 15 {
        table[n as usize]
    } else {
        let n2 = (n * n) as f64;

        let mut result = 0.0;
        if n <= 35 {
            result = (1.0 / 1188.0) / n2;
        }
        if n <= 80 {
            result = (1.0 / 1680.0 - result) / n2;
        }
        if n <= 500 {
            result = (1.0 / 1260.0 - result) / n2;
        }
        result = (1.0 / 360.0 - result) / n2;
        result = (1.0 / 12.0 - result) / n2;

        result * n as f64
    }
}

/// Natural log of the binomial pmf `P(X = x)` for `X ~ B(n, p)`.
///
/// Exact zero/one boundary cases return the log probability directly; the
/// general case uses the saddle point expansion.
pub fn log_binom_pmf(x: i64, n: i64, p: f64) -> f64 {
    if x < 0 {
        return 0.0;
    }

    let q = 1.0 - p;

    if p == 0.0 {
        if x == 0 {
            1.0
        } else {
            0.0
        }
    } else if q == 0.0 {
        if x == n {
            1.0
        } else {
            0.0
        }
    } else if x == 0 && n == 0 {
        1.0
    } else if x == 0 {
        let n = n as f64;
        if p < 0.1 {
            -bd0(n, n * q) - n * p
        } else {
            n * q.ln()
        }
    } else if x == n {
        let n = n as f64;
        if q < 0.1 {
            -bd0(n, n * p) - n * q
        } else {
            n * p.ln()
        }
    } else if x > n {
        0.0
    } else {
        let (xf, nf) = (x as f64, n as f64);
        let lc = stirling_error(n as u64)
            - stirling_error(x as u64)
            - stirling_error((n - x) as u64)
            - bd0(xf, nf * p)
            - bd0(nf - xf, nf * q);
        let lf = LN_2PI + xf.ln() + (-xf / nf).ln_1p();

        lc - 0.5 * lf
    }
}

/// Natural log of the hypergeometric probability of drawing `x` marked items
/// in `n` draws from an urn with `r` marked and `b` unmarked items.
///
/// Zero outside the support, mirroring [`log_binom_pmf`].
pub fn log_hypergeom(x: i64, r: i64, b: i64, n: i64) -> f64 {
    if n < x || r < x || n - x > b {
        0.0
    } else if n == 0 {
        if x == 0 {
            1.0
        } else {
            0.0
        }
    } else {
        let p = n as f64 / (r + b) as f64;

        let p1 = log_binom_pmf(x, r, p);
        let p2 = log_binom_pmf(n - x, b, p);
        let p3 = log_binom_pmf(n, r + b, p);

        p1 + p2 - p3
    }
}
