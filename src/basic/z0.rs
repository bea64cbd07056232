use std::collections::{HashMap, HashSet};

use num_complex::Complex64;
use num_traits::Zero;

use super::flow::{BranchSide, is_nan_c};

/// A branch whose impedance is below the zero-impedance threshold. Its flow
/// cannot come from the π kernel and is recovered by balance propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Z0Branch {
    pub bus1: i64,
    pub bus2: i64,
}

/// What kind of equipment a terminal flow belongs to. Zero-impedance
/// terminals carry the index of their branch in [`FlowIndex::z0`] instead of
/// a flow value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    Injection,
    Shunt,
    Branch,
    Transformer { phase_shifting: bool },
    Z0(usize),
}

/// Flow injected into a bus by one piece of connected equipment. NaN marks an
/// unknown flow.
#[derive(Debug, Clone, Copy)]
pub struct TerminalFlow {
    pub kind: TerminalKind,
    pub flow: Complex64,
}

/// Per-bus index of all connected terminal flows plus the zero-impedance
/// branch table they refer to.
#[derive(Debug, Default, Clone)]
pub struct FlowIndex {
    pub at_bus: HashMap<i64, Vec<TerminalFlow>>,
    pub z0: Vec<Z0Branch>,
}

impl FlowIndex {
    pub fn push(&mut self, bus: i64, kind: TerminalKind, flow: Complex64) {
        self.at_bus.entry(bus).or_default().push(TerminalFlow { kind, flow });
    }
}

/// Resolves zero-impedance branch flows by Kirchhoff balance at their buses.
pub struct Z0Solve<'a> {
    pub index: &'a FlowIndex,
    /// When set, an unknown flow on a phase-shifting transformer terminal is
    /// skipped instead of blocking the whole resolution.
    pub ptc_unknown_contributing: bool,
}

impl<'a> Z0Solve<'a> {
    pub fn new(index: &'a FlowIndex) -> Self {
        Self { index, ptc_unknown_contributing: false }
    }

    /// Flow of zero-impedance branch `branch`, solved from the bus at `side`.
    ///
    /// Returns `(local, other)` injections into the respective buses, or
    /// `None` when some terminal flow needed for the balance is unknown or
    /// the propagation runs into a zero-impedance cycle. A branch closed on a
    /// single bus carries nothing.
    pub fn resolve(&self, branch: usize, side: BranchSide) -> Option<(Complex64, Complex64)> {
        let br = self.index.z0[branch];
        if br.bus1 == br.bus2 {
            return Some((Complex64::zero(), Complex64::zero()));
        }
        let bus = match side {
            BranchSide::End1 => br.bus1,
            BranchSide::End2 => br.bus2,
        };
        let mut visited = HashSet::new();
        visited.insert(branch);
        let s = self.sum_at(branch, bus, &mut visited)?;
        Some((-s, s))
    }

    /// Sum of all terminal injections at `bus` other than branch `current`.
    /// A neighbouring zero-impedance branch contributes whatever its own far
    /// bus forces it to carry; a branch already being solved means a cycle.
    fn sum_at(
        &self,
        current: usize,
        bus: i64,
        visited: &mut HashSet<usize>,
    ) -> Option<Complex64> {
        let mut total = Complex64::zero();
        let terminals = self.index.at_bus.get(&bus).map(Vec::as_slice).unwrap_or(&[]);
        for t in terminals {
            match t.kind {
                TerminalKind::Z0(j) if j == current => {}
                TerminalKind::Z0(j) => {
                    let zb = self.index.z0[j];
                    if zb.bus1 == zb.bus2 {
                        continue;
                    }
                    if !visited.insert(j) {
                        return None;
                    }
                    let other = if zb.bus1 == bus { zb.bus2 } else { zb.bus1 };
                    total += self.sum_at(j, other, visited)?;
                }
                TerminalKind::Transformer { phase_shifting } if is_nan_c(t.flow) => {
                    if !(phase_shifting && self.ptc_unknown_contributing) {
                        return None;
                    }
                }
                _ => {
                    if is_nan_c(t.flow) {
                        return None;
                    }
                    total += t.flow;
                }
            }
        }
        Some(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::flow::nan_c;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn single_branch_balances_the_bus() {
        let mut idx = FlowIndex::default();
        idx.z0.push(Z0Branch { bus1: 10, bus2: 11 });
        idx.push(10, TerminalKind::Injection, c(-20.0, -5.0));
        idx.push(10, TerminalKind::Z0(0), nan_c());
        idx.push(11, TerminalKind::Z0(0), nan_c());
        let (local, other) = Z0Solve::new(&idx).resolve(0, BranchSide::End1).unwrap();
        assert!((local - c(20.0, 5.0)).norm() < 1e-12);
        assert!((other - c(-20.0, -5.0)).norm() < 1e-12);
    }

    #[test]
    fn chain_of_branches_propagates() {
        let mut idx = FlowIndex::default();
        idx.z0.push(Z0Branch { bus1: 1, bus2: 2 });
        idx.z0.push(Z0Branch { bus1: 2, bus2: 3 });
        idx.push(1, TerminalKind::Injection, c(-10.0, 0.0));
        idx.push(1, TerminalKind::Z0(0), nan_c());
        idx.push(2, TerminalKind::Z0(0), nan_c());
        idx.push(2, TerminalKind::Z0(1), nan_c());
        idx.push(3, TerminalKind::Z0(1), nan_c());
        let (at2, at3) = Z0Solve::new(&idx).resolve(1, BranchSide::End1).unwrap();
        assert!((at2 - c(10.0, 0.0)).norm() < 1e-12);
        assert!((at3 - c(-10.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn cycle_is_unresolvable() {
        let mut idx = FlowIndex::default();
        idx.z0.push(Z0Branch { bus1: 1, bus2: 2 });
        idx.z0.push(Z0Branch { bus1: 1, bus2: 2 });
        idx.push(1, TerminalKind::Z0(0), nan_c());
        idx.push(1, TerminalKind::Z0(1), nan_c());
        idx.push(2, TerminalKind::Z0(0), nan_c());
        idx.push(2, TerminalKind::Z0(1), nan_c());
        assert!(Z0Solve::new(&idx).resolve(0, BranchSide::End1).is_none());
    }

    #[test]
    fn branch_closed_on_one_bus_carries_nothing() {
        let mut idx = FlowIndex::default();
        idx.z0.push(Z0Branch { bus1: 5, bus2: 5 });
        idx.push(5, TerminalKind::Injection, c(-7.0, 1.0));
        idx.push(5, TerminalKind::Z0(0), nan_c());
        let (local, other) = Z0Solve::new(&idx).resolve(0, BranchSide::End1).unwrap();
        assert_eq!(local, c(0.0, 0.0));
        assert_eq!(other, c(0.0, 0.0));
    }

    #[test]
    fn unknown_terminal_blocks_resolution() {
        let mut idx = FlowIndex::default();
        idx.z0.push(Z0Branch { bus1: 1, bus2: 2 });
        idx.push(1, TerminalKind::Branch, nan_c());
        idx.push(1, TerminalKind::Z0(0), nan_c());
        assert!(Z0Solve::new(&idx).resolve(0, BranchSide::End1).is_none());
    }

    #[test]
    fn unknown_phase_shifter_can_be_relaxed() {
        let mut idx = FlowIndex::default();
        idx.z0.push(Z0Branch { bus1: 1, bus2: 2 });
        idx.push(1, TerminalKind::Injection, c(-3.0, 0.0));
        idx.push(1, TerminalKind::Transformer { phase_shifting: true }, nan_c());
        idx.push(1, TerminalKind::Z0(0), nan_c());
        let solver = Z0Solve::new(&idx);
        assert!(solver.resolve(0, BranchSide::End1).is_none());
        let relaxed = Z0Solve { index: &idx, ptc_unknown_contributing: true };
        let (local, _) = relaxed.resolve(0, BranchSide::End1).unwrap();
        assert!((local - c(3.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn empty_far_bus_means_zero_flow() {
        let mut idx = FlowIndex::default();
        idx.z0.push(Z0Branch { bus1: 1, bus2: 2 });
        idx.push(1, TerminalKind::Z0(0), nan_c());
        let (local, other) = Z0Solve::new(&idx).resolve(0, BranchSide::End1).unwrap();
        assert_eq!(local.norm(), 0.0);
        assert_eq!(other.norm(), 0.0);
    }
}
