use num_complex::Complex64;
use num_traits::Zero;

use super::flow::{is_nan_c, nan_c};

/// One winding of a three-winding transformer, reduced to its star
/// representation: corrected series admittance `y`, the ideal ratio on the
/// terminal side (`a_term`) and on the star side (`a_star`), and the terminal
/// voltage phasor with the winding clock already applied.
#[derive(Debug, Clone, Copy)]
pub struct StarLeg {
    pub y: Complex64,
    pub a_term: Complex64,
    pub a_star: Complex64,
    pub v: Complex64,
    pub connected: bool,
}

/// Voltage of the internal star bus, eliminated by a single-unknown nodal
/// equation over the connected legs.
///
/// KCL at the star node with the magnetizing admittance `ysh` attached there:
///
/// ```text
///        Σ a_star_l* · a_term_l · y_l · V_l
/// V0 = ─────────────────────────────────────
///          Σ |a_star_l|² · y_l  +  ysh
/// ```
///
/// Disconnected legs drop out of both sums. A connected leg with an unknown
/// terminal voltage makes the star voltage unknown (NaN), as does a network
/// with no connected legs.
pub fn star_bus_voltage(legs: &[StarLeg], ysh: Complex64) -> Complex64 {
    let mut num = Complex64::zero();
    let mut den = ysh;
    let mut any = false;
    for leg in legs {
        if !leg.connected {
            continue;
        }
        if is_nan_c(leg.v) || is_nan_c(leg.y) {
            return nan_c();
        }
        num += leg.a_star.conj() * leg.a_term * leg.y * leg.v;
        den += leg.a_star.norm_sqr() * leg.y;
        any = true;
    }
    if !any || den.norm_sqr() == 0.0 {
        return nan_c();
    }
    num / den
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn leg(y: Complex64, v: Complex64) -> StarLeg {
        StarLeg {
            y,
            a_term: Complex64::new(1.0, 0.0),
            a_star: Complex64::new(1.0, 0.0),
            v,
            connected: true,
        }
    }

    fn polar(m: f64, deg: f64) -> Complex64 {
        Complex64::from_polar(m, deg * PI / 180.0)
    }

    #[test]
    fn equal_admittances_average_the_terminal_voltages() {
        let y = Complex64::new(0.0, -1e4);
        let vs = [polar(1.0, 0.0), polar(1.02, -2.0), polar(0.98, 1.0)];
        let legs: Vec<StarLeg> = vs.iter().map(|v| leg(y, *v)).collect();
        let v0 = star_bus_voltage(&legs, Complex64::new(0.0, 0.0));
        let mean = (vs[0] + vs[1] + vs[2]) / 3.0;
        assert!((v0 - mean).norm() < 1e-9);
    }

    #[test]
    fn single_leg_reaches_no_load_voltage() {
        let y = Complex64::new(0.2, -8.0);
        let a = Complex64::from_polar(1.05, 0.1);
        let v = polar(1.0, 0.0);
        let legs = [StarLeg {
            y,
            a_term: a,
            a_star: Complex64::new(1.0, 0.0),
            v,
            connected: true,
        }];
        let v0 = star_bus_voltage(&legs, Complex64::new(0.0, 0.0));
        assert!((v0 - a * v).norm() < 1e-12);
    }

    #[test]
    fn disconnected_legs_are_excluded() {
        let y = Complex64::new(0.0, -10.0);
        let mut legs = vec![leg(y, polar(1.0, 0.0)), leg(y, polar(1.1, 0.0))];
        legs[1].connected = false;
        let v0 = star_bus_voltage(&legs, Complex64::new(0.0, 0.0));
        assert!((v0 - polar(1.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn unknown_terminal_voltage_makes_star_unknown() {
        let y = Complex64::new(0.0, -10.0);
        let legs = vec![leg(y, polar(1.0, 0.0)), leg(y, super::nan_c())];
        assert!(is_nan_c(star_bus_voltage(&legs, Complex64::new(0.0, 0.0))));
    }

    #[test]
    fn all_legs_open_is_unknown() {
        let y = Complex64::new(0.0, -10.0);
        let mut l = leg(y, polar(1.0, 0.0));
        l.connected = false;
        assert!(is_nan_c(star_bus_voltage(&[l], Complex64::new(0.0, 0.0))));
    }
}
