//! Numerical tests for the Black-Scholes kernel and the IV solver

use approx::{assert_abs_diff_eq, assert_relative_eq};
use common::OptionRight;
use gamma_engine::BlackScholes;
use proptest::prelude::*;
use rstest::rstest;

/// 0DTE-ish time to expiry used across cases
const T_6H: f64 = 6.0 / (24.0 * 365.0);

#[rstest]
#[case(5900.0, 5900.0)]
#[case(5900.0, 5800.0)]
#[case(5900.0, 6000.0)]
#[case(5900.0, 5500.0)]
#[case(5900.0, 6400.0)]
fn gamma_put_call_symmetry(#[case] s: f64, #[case] k: f64) {
    let call = BlackScholes::greeks(OptionRight::Call, s, k, T_6H, 0.0, 0.0, 0.2).unwrap();
    let put = BlackScholes::greeks(OptionRight::Put, s, k, T_6H, 0.0, 0.0, 0.2).unwrap();
    assert_abs_diff_eq!(call.gamma, put.gamma, epsilon = 1e-12);
    assert!(call.gamma >= 0.0);
}

#[rstest]
#[case(0.05)]
#[case(0.10)]
#[case(0.20)]
#[case(0.50)]
#[case(1.00)]
#[case(2.00)]
fn iv_round_trip_within_tolerance(#[case] sigma: f64) {
    let (s, k, r, q) = (5900.0, 5900.0, 0.0, 0.0);
    let price = BlackScholes::price(OptionRight::Call, s, k, T_6H, r, q, sigma).unwrap();
    let solved = BlackScholes::implied_vol_call(price, s, k, T_6H, r, q)
        .expect("solver should converge on its own prices");
    // Price tolerance 1e-4 translates to a tight sigma tolerance ATM
    assert_abs_diff_eq!(solved, sigma, epsilon = 1e-3);
}

#[rstest]
fn call_delta_bounds_and_monotonicity() {
    let deltas: Vec<f64> = [5500.0, 5800.0, 5900.0, 6000.0, 6400.0]
        .iter()
        .map(|&k| {
            BlackScholes::greeks(OptionRight::Call, 5900.0, k, T_6H, 0.0, 0.0, 0.2)
                .unwrap()
                .delta
        })
        .collect();
    for delta in &deltas {
        assert!((0.0..=1.0).contains(delta));
    }
    // Delta falls as the strike climbs
    for pair in deltas.windows(2) {
        assert!(pair[0] >= pair[1]);
    }
}

#[rstest]
fn vega_peaks_near_the_money() {
    let vega_atm = BlackScholes::greeks(OptionRight::Call, 5900.0, 5900.0, T_6H, 0.0, 0.0, 0.2)
        .unwrap()
        .vega;
    let vega_wing = BlackScholes::greeks(OptionRight::Call, 5900.0, 6300.0, T_6H, 0.0, 0.0, 0.2)
        .unwrap()
        .vega;
    assert!(vega_atm > vega_wing);
    assert!(vega_wing >= 0.0);
}

#[rstest]
fn theta_decays_long_premium() {
    let theta = BlackScholes::greeks(OptionRight::Call, 5900.0, 5900.0, T_6H, 0.0, 0.0, 0.2)
        .unwrap()
        .theta;
    assert!(theta < 0.0);
}

#[rstest]
fn prices_converge_to_intrinsic_at_expiry() {
    let call = BlackScholes::greeks(OptionRight::Call, 5900.0, 5800.0, 0.0, 0.0, 0.0, 0.2).unwrap();
    assert_relative_eq!(call.price, 100.0, epsilon = 1e-9);
    let put = BlackScholes::greeks(OptionRight::Put, 5700.0, 5800.0, -0.1, 0.0, 0.0, 0.2).unwrap();
    assert_relative_eq!(put.price, 100.0, epsilon = 1e-9);
}

proptest! {
    /// gamma(call) == gamma(put) across the whole valid input box
    #[test]
    fn prop_gamma_right_agnostic(
        s in 1000.0f64..10_000.0,
        moneyness in 0.8f64..1.2,
        t in 1e-4f64..0.5,
        sigma in 0.05f64..2.0,
        r in -0.02f64..0.08,
    ) {
        let k = s * moneyness;
        let call = BlackScholes::greeks(OptionRight::Call, s, k, t, r, 0.0, sigma).unwrap();
        let put = BlackScholes::greeks(OptionRight::Put, s, k, t, r, 0.0, sigma).unwrap();
        prop_assert!((call.gamma - put.gamma).abs() < 1e-10);
        prop_assert!(call.gamma.is_finite());
    }

    /// iv_from_price(price_from_iv(sigma)) ~ sigma for solvable inputs
    #[test]
    fn prop_iv_round_trip(
        sigma in 0.05f64..2.0,
        moneyness in 0.95f64..1.05,
        t in 0.001f64..0.25,
    ) {
        let s = 5900.0;
        let k = s * moneyness;
        let price = BlackScholes::price(OptionRight::Call, s, k, t, 0.0, 0.0, sigma).unwrap();
        // Skip prices that collapse onto intrinsic beyond solver resolution
        let intrinsic = (s - k).max(0.0);
        prop_assume!(price - intrinsic > 1e-3);

        let solved = BlackScholes::implied_vol_call(price, s, k, t, 0.0, 0.0);
        prop_assert!(solved.is_some());
        let solved = solved.unwrap();
        let reprice = BlackScholes::price(OptionRight::Call, s, k, t, 0.0, 0.0, solved).unwrap();
        prop_assert!((reprice - price).abs() < 1e-3);
    }

    /// Put-call parity holds wherever the closed form is defined
    #[test]
    fn prop_put_call_parity(
        s in 1000.0f64..10_000.0,
        moneyness in 0.8f64..1.2,
        t in 1e-4f64..0.5,
        sigma in 0.05f64..2.0,
    ) {
        let k = s * moneyness;
        let call = BlackScholes::price(OptionRight::Call, s, k, t, 0.0, 0.0, sigma).unwrap();
        let put = BlackScholes::price(OptionRight::Put, s, k, t, 0.0, 0.0, sigma).unwrap();
        let lhs = call - put;
        let rhs = s - k;
        prop_assert!((lhs - rhs).abs() < 1e-6 * s);
    }
}
