//! Black-Scholes-Merton kernel: pricing, Greeks, implied volatility
//!
//! No-dividend index options with a configurable risk-free rate; time is
//! ACT/365 fixed. The implied-vol solver is a bracketed bisection with
//! Newton acceleration where vega is well-conditioned.

use common::OptionRight;

const SQRT_2PI: f64 = 2.5066282746310002;

/// Solver bracket for sigma
pub const IV_MIN: f64 = 1e-4;
/// Upper sigma bound (500%)
pub const IV_MAX: f64 = 5.0;
/// Absolute price tolerance for the solver
const IV_PRICE_TOL: f64 = 1e-4;
/// Iteration cap
const IV_MAX_ITERATIONS: usize = 100;
/// Below this sigma the forward degenerates and delta saturates
const SIGMA_FLOOR: f64 = 1e-12;

/// First-order sensitivities for one contract
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Greeks {
    /// Theoretical price
    pub price: f64,
    /// dPrice/dS
    pub delta: f64,
    /// d2Price/dS2
    pub gamma: f64,
    /// dPrice/dSigma
    pub vega: f64,
    /// dPrice/dT (per year)
    pub theta: f64,
}

/// Black-Scholes-Merton closed form
#[derive(Debug)]
pub struct BlackScholes;

impl BlackScholes {
    /// Standard normal cumulative distribution function
    #[must_use]
    pub fn norm_cdf(x: f64) -> f64 {
        0.5 * (1.0 + libm::erf(x / std::f64::consts::SQRT_2))
    }

    /// Standard normal probability density function
    #[must_use]
    pub fn norm_pdf(x: f64) -> f64 {
        (-0.5 * x * x).exp() / SQRT_2PI
    }

    fn d1(s: f64, k: f64, t: f64, r: f64, q: f64, sigma: f64) -> f64 {
        ((s / k).ln() + (r - q + 0.5 * sigma * sigma) * t) / (sigma * t.sqrt())
    }

    /// Theoretical price. `None` when spot or strike is non-positive.
    #[must_use]
    pub fn price(right: OptionRight, s: f64, k: f64, t: f64, r: f64, q: f64, sigma: f64) -> Option<f64> {
        Self::greeks(right, s, k, t, r, q, sigma).map(|g| g.price)
    }

    /// Gamma per contract; zero at or past expiry.
    #[must_use]
    pub fn gamma(s: f64, k: f64, t: f64, r: f64, q: f64, sigma: f64) -> Option<f64> {
        // Calls and puts share gamma, so the right is immaterial here
        Self::greeks(OptionRight::Call, s, k, t, r, q, sigma).map(|g| g.gamma)
    }

    /// Full Greeks. `None` when spot or strike is non-positive; expiry and
    /// vanishing volatility saturate instead of failing.
    #[must_use]
    pub fn greeks(
        right: OptionRight,
        s: f64,
        k: f64,
        t: f64,
        r: f64,
        q: f64,
        sigma: f64,
    ) -> Option<Greeks> {
        if s <= 0.0 || k <= 0.0 {
            return None;
        }
        if t <= 0.0 {
            return Some(Self::expired(right, s, k));
        }
        if sigma < SIGMA_FLOOR {
            return Some(Self::saturated(right, s, k, t, r, q));
        }

        let sqrt_t = t.sqrt();
        let d1 = Self::d1(s, k, t, r, q, sigma);
        let d2 = d1 - sigma * sqrt_t;
        if !d1.is_finite() {
            return None;
        }

        let nd1 = Self::norm_cdf(d1);
        let nd2 = Self::norm_cdf(d2);
        let pdf_d1 = Self::norm_pdf(d1);
        let disc_q = (-q * t).exp();
        let disc_r = (-r * t).exp();

        let (price, delta, theta) = match right {
            OptionRight::Call => {
                let price = s * disc_q * nd1 - k * disc_r * nd2;
                let delta = disc_q * nd1;
                let theta = -(s * disc_q * pdf_d1 * sigma) / (2.0 * sqrt_t)
                    + q * s * disc_q * nd1
                    - r * k * disc_r * nd2;
                (price, delta, theta)
            }
            OptionRight::Put => {
                let price = k * disc_r * Self::norm_cdf(-d2) - s * disc_q * Self::norm_cdf(-d1);
                let delta = disc_q * (nd1 - 1.0);
                let theta = -(s * disc_q * pdf_d1 * sigma) / (2.0 * sqrt_t)
                    - q * s * disc_q * Self::norm_cdf(-d1)
                    + r * k * disc_r * Self::norm_cdf(-d2);
                (price, delta, theta)
            }
        };

        let gamma = disc_q * pdf_d1 / (s * sigma * sqrt_t);
        let vega = s * disc_q * sqrt_t * pdf_d1;

        Some(Greeks {
            price,
            delta,
            gamma,
            vega,
            theta,
        })
    }

    fn expired(right: OptionRight, s: f64, k: f64) -> Greeks {
        let (price, delta) = match right {
            OptionRight::Call => ((s - k).max(0.0), if s > k { 1.0 } else { 0.0 }),
            OptionRight::Put => ((k - s).max(0.0), if s < k { -1.0 } else { 0.0 }),
        };
        Greeks {
            price,
            delta,
            gamma: 0.0,
            vega: 0.0,
            theta: 0.0,
        }
    }

    fn saturated(right: OptionRight, s: f64, k: f64, t: f64, r: f64, q: f64) -> Greeks {
        let fwd = s * ((r - q) * t).exp();
        let disc_r = (-r * t).exp();
        let disc_q = (-q * t).exp();
        let (price, delta) = match right {
            OptionRight::Call => (
                (s * disc_q - k * disc_r).max(0.0),
                if fwd > k { disc_q } else { 0.0 },
            ),
            OptionRight::Put => (
                (k * disc_r - s * disc_q).max(0.0),
                if fwd < k { -disc_q } else { 0.0 },
            ),
        };
        Greeks {
            price,
            delta,
            gamma: 0.0,
            vega: 0.0,
            theta: 0.0,
        }
    }

    /// Implied volatility of a call from its market mid.
    #[must_use]
    pub fn implied_vol_call(market_mid: f64, s: f64, k: f64, t: f64, r: f64, q: f64) -> Option<f64> {
        Self::implied_vol(OptionRight::Call, market_mid, s, k, t, r, q)
    }

    /// Implied volatility of a put from its market mid.
    #[must_use]
    pub fn implied_vol_put(market_mid: f64, s: f64, k: f64, t: f64, r: f64, q: f64) -> Option<f64> {
        Self::implied_vol(OptionRight::Put, market_mid, s, k, t, r, q)
    }

    /// Bracketed solver over sigma in `[IV_MIN, IV_MAX]`.
    ///
    /// Bisection guarantees progress; a Newton step from the current
    /// estimate is taken whenever it stays inside the bracket and vega is
    /// not degenerate. Returns `None` on no bracket, NaN, or
    /// non-convergence within the iteration cap.
    #[must_use]
    pub fn implied_vol(
        right: OptionRight,
        market_mid: f64,
        s: f64,
        k: f64,
        t: f64,
        r: f64,
        q: f64,
    ) -> Option<f64> {
        if !(market_mid > 0.0) || !market_mid.is_finite() || s <= 0.0 || k <= 0.0 || t <= 0.0 {
            return None;
        }

        let objective = |sigma: f64| -> Option<f64> {
            let price = Self::price(right, s, k, t, r, q, sigma)?;
            let diff = price - market_mid;
            diff.is_finite().then_some(diff)
        };

        let mut lo = IV_MIN;
        let mut hi = IV_MAX;
        let mut f_lo = objective(lo)?;
        let f_hi = objective(hi)?;

        if f_lo.abs() < IV_PRICE_TOL {
            return Some(lo);
        }
        if f_hi.abs() < IV_PRICE_TOL {
            return Some(hi);
        }
        if f_lo.signum() == f_hi.signum() {
            // Mid below intrinsic or above the sigma cap's price
            return None;
        }

        let mut sigma = 0.5 * (lo + hi);
        for _ in 0..IV_MAX_ITERATIONS {
            let f_mid = objective(sigma)?;
            if f_mid.abs() < IV_PRICE_TOL {
                return Some(sigma);
            }

            if f_mid.signum() == f_lo.signum() {
                lo = sigma;
                f_lo = f_mid;
            } else {
                hi = sigma;
            }

            // Newton acceleration when the step stays bracketed
            let mut next = 0.5 * (lo + hi);
            if let Some(greeks) = Self::greeks(right, s, k, t, r, q, sigma) {
                if greeks.vega > 1e-10 {
                    let newton = sigma - f_mid / greeks.vega;
                    if newton.is_finite() && newton > lo && newton < hi {
                        next = newton;
                    }
                }
            }
            sigma = next;
        }

        None
    }
}
