use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Identifies one end of a two-port branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchSide {
    End1,
    End2,
}

/// Universal π-equivalent of a branch in per-unit on the bus voltage bases.
///
/// Series impedance `r + jx` sits between two ideal complex ratios
/// `ρ1∠α1` (end 1) and `ρ2∠α2` (end 2); the shunt halves `g1 + jb1` and
/// `g2 + jb2` hang on the branch side of the respective ratio. Plain lines
/// use unit ratios; transformers encode their off-nominal ratio and phase
/// shift in whichever end the active mapping alternative assigns it to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiModel {
    pub r: f64,
    pub x: f64,
    pub g1: f64,
    pub b1: f64,
    pub g2: f64,
    pub b2: f64,
    pub rho1: f64,
    pub alpha1: f64,
    pub rho2: f64,
    pub alpha2: f64,
}

impl Default for PiModel {
    fn default() -> Self {
        Self {
            r: 0.0,
            x: 0.0,
            g1: 0.0,
            b1: 0.0,
            g2: 0.0,
            b2: 0.0,
            rho1: 1.0,
            alpha1: 0.0,
            rho2: 1.0,
            alpha2: 0.0,
        }
    }
}

impl PiModel {
    /// π-model of a plain line with its total shunt split evenly between ends.
    pub fn line(r: f64, x: f64, g: f64, b: f64) -> Self {
        Self {
            r,
            x,
            g1: g / 2.0,
            b1: b / 2.0,
            g2: g / 2.0,
            b2: b / 2.0,
            ..Default::default()
        }
    }

    /// Series admittance `1/(r + jx)`, with the reactance pushed away from
    /// zero by `epsilon` when correction is enabled.
    pub fn series_admittance(&self, epsilon: f64, correct_x: bool) -> Complex64 {
        let x = if correct_x && self.x.abs() < epsilon {
            if self.x < 0.0 { -epsilon } else { epsilon }
        } else {
            self.x
        };
        let z = Complex64::new(self.r, x);
        if z.norm_sqr() == 0.0 {
            return nan_c();
        }
        z.inv()
    }

    pub fn ratio(&self, side: BranchSide) -> Complex64 {
        match side {
            BranchSide::End1 => Complex64::from_polar(self.rho1, self.alpha1),
            BranchSide::End2 => Complex64::from_polar(self.rho2, self.alpha2),
        }
    }

    pub fn shunt(&self, side: BranchSide) -> Complex64 {
        match side {
            BranchSide::End1 => Complex64::new(self.g1, self.b1),
            BranchSide::End2 => Complex64::new(self.g2, self.b2),
        }
    }
}

/// Complex NaN sentinel for unknown voltages and flows.
pub fn nan_c() -> Complex64 {
    Complex64::new(f64::NAN, f64::NAN)
}

pub fn is_nan_c(v: Complex64) -> bool {
    v.re.is_nan() || v.im.is_nan()
}

/// Complex power injected into the bus at `side` of the branch, in per-unit.
///
/// Positive means power flows out of the branch into the bus. Returns NaN
/// when this end is disconnected or a required voltage is unknown, so
/// callers can distinguish "no flow computed" from a genuine zero. An open
/// far end does not make the flow unknown: the branch then only carries its
/// own shunt current, obtained by eliminating the open node.
pub fn branch_flow(
    pi: &PiModel,
    side: BranchSide,
    v_local: Complex64,
    v_far: Complex64,
    local_connected: bool,
    far_connected: bool,
    epsilon: f64,
    correct_x: bool,
) -> Complex64 {
    if !local_connected || is_nan_c(v_local) {
        return nan_c();
    }
    let y = pi.series_admittance(epsilon, correct_x);
    if is_nan_c(y) {
        return nan_c();
    }
    let far = match side {
        BranchSide::End1 => BranchSide::End2,
        BranchSide::End2 => BranchSide::End1,
    };
    let a_local = pi.ratio(side);
    let ysh_local = pi.shunt(side);
    if !far_connected {
        // Open far end: series admittance in series with the far shunt,
        // seen from this end. No current crosses the far ratio.
        let denom = y + pi.shunt(far);
        if denom.norm_sqr() == 0.0 {
            return nan_c();
        }
        let y_eq = ysh_local + y * pi.shunt(far) / denom;
        return -(a_local.norm_sqr() * v_local.norm_sqr() * y_eq.conj());
    }
    if is_nan_c(v_far) {
        return nan_c();
    }
    let a_far = pi.ratio(far);
    // S into the branch at this end:
    //   S = |a_l V_l|^2 (y + ysh_l)* - a_l a_f* V_l V_f* y*
    let s_into = a_local.norm_sqr() * v_local.norm_sqr() * (y + ysh_local).conj()
        - a_local * a_far.conj() * v_local * v_far.conj() * y.conj();
    -s_into
}
