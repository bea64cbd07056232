use std::collections::{BTreeMap, HashMap};
use std::fmt;

use bevy_ecs::name::Name;
use bevy_ecs::prelude::*;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::basic::flow::{BranchSide, PiModel, branch_flow, is_nan_c, nan_c};
use crate::basic::starbus::{StarLeg, star_bus_voltage};
use crate::io::conv::LoadExchangeModel;
use crate::io::exchange::GridModel;

use super::elements::*;
use super::interpret::MappingAlternative;
use super::network::{DataOps, InterpNet, InterpretError};
use super::propagate::{build_flow_index, resolve_z0_flows};

/// Knobs of the flow recomputation and validation pipeline.
#[derive(Debug, Resource, Clone, Serialize, Deserialize)]
pub struct InterpretConfig {
    /// Per-unit tolerance between a recorded and a recomputed flow.
    pub flow_threshold_pu: f64,
    /// Bus balance tolerance in MVA.
    pub balance_tol_mva: f64,
    /// Branches with per-unit |r| and |x| both below this are treated as
    /// zero-impedance and resolved by propagation.
    pub z0_threshold_pu: f64,
    /// Reactance substituted for per-unit reactances below it when the
    /// correction is active.
    pub reactance_epsilon: f64,
    /// Apply the reactance correction to two-port branches.
    pub apply_reactance_correction: bool,
    /// Let an unknown phase-shifter flow contribute zero to zero-impedance
    /// propagation instead of blocking it.
    pub ptc_unknown_contributing: bool,
    /// How three-winding transformer flows are obtained.
    pub t3w_flows: T3wFlowMode,
    /// Stop enumerating alternatives at the first one with no failed flows
    /// and a vanishing balance error.
    pub stop_on_zero_error: bool,
}

impl Default for InterpretConfig {
    fn default() -> Self {
        Self {
            flow_threshold_pu: 1e-6,
            balance_tol_mva: 1.0,
            z0_threshold_pu: 1e-5,
            reactance_epsilon: 1e-4,
            apply_reactance_correction: false,
            ptc_unknown_contributing: false,
            t3w_flows: T3wFlowMode::StarBus,
            stop_on_zero_error: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum T3wFlowMode {
    /// Eliminate the internal star bus and run each leg through the π kernel.
    #[default]
    StarBus,
    /// Leave three-winding flows uncomputed.
    NotComputed,
}

/// Outcome of comparing one branch end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStatus {
    /// Recomputed and within tolerance of the record.
    Ok,
    /// Recomputed but outside tolerance.
    Failed,
    /// No flow could be computed for this end.
    NotCalculated,
    /// Recomputed, but the snapshot has no record to compare against.
    MissingRecord,
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowStatus::Ok => "ok",
            FlowStatus::Failed => "failed",
            FlowStatus::NotCalculated => "not-calculated",
            FlowStatus::MissingRecord => "missing-record",
        };
        f.write_str(s)
    }
}

/// One branch end of the validation report. Computed values are zero whenever
/// `calculated` is false, never NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchEndFlow {
    pub p_mw: f64,
    pub q_mvar: f64,
    pub p_recorded_mw: f64,
    pub q_recorded_mvar: f64,
    pub calculated: bool,
    pub status: FlowStatus,
}

/// Sum of all known injections at a bus, in MW/MVar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NodeBalance {
    pub p_mw: f64,
    pub q_mvar: f64,
    /// False when some adjacent flow is unknown; the sums are then zeroed
    /// and the bus is excluded from the error figure.
    pub known: bool,
}

impl NodeBalance {
    pub fn mismatch_mva(&self) -> f64 {
        (self.p_mw * self.p_mw + self.q_mvar * self.q_mvar).sqrt()
    }
}

/// Full validation output for one converted model.
#[derive(Debug, Clone, Default, Resource, Serialize)]
pub struct ValidationReport {
    pub flows: BTreeMap<String, BranchEndFlow>,
    pub balances: BTreeMap<i64, NodeBalance>,
    /// Sum of the balance mismatch over all fully known buses, MVA.
    pub error_mva: f64,
    pub flow_threshold_pu: f64,
    pub balance_tol_mva: f64,
}

impl ValidationReport {
    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn ok_count(&self) -> usize {
        self.count(FlowStatus::Ok)
    }

    pub fn failed_count(&self) -> usize {
        self.count(FlowStatus::Failed)
    }

    pub fn not_calculated_count(&self) -> usize {
        self.count(FlowStatus::NotCalculated)
    }

    pub fn missing_record_count(&self) -> usize {
        self.count(FlowStatus::MissingRecord)
    }

    fn count(&self, status: FlowStatus) -> usize {
        self.flows.values().filter(|f| f.status == status).count()
    }

    pub fn bad_balance_count(&self) -> usize {
        self.balances
            .values()
            .filter(|b| b.known && b.mismatch_mva() > self.balance_tol_mva)
            .count()
    }

    pub fn unknown_balance_count(&self) -> usize {
        self.balances.values().filter(|b| !b.known).count()
    }
}

/// Recomputes the two-port branch flows from the bus voltages.
pub(crate) fn compute_branch_flows(
    cfg: Res<InterpretConfig>,
    common: Res<CommonData>,
    volts: Res<BusVoltages>,
    mut branches: Query<
        (
            &BranchModel,
            &Port2,
            &Conn2,
            Option<&BoundaryVoltage>,
            &mut ComputedFlow2,
        ),
        Without<ZeroImpedance>,
    >,
) {
    let eps = cfg.reactance_epsilon;
    let correct = cfg.apply_reactance_correction;
    for (model, port, conn, boundary, mut computed) in branches.iter_mut() {
        let v1 = volts.voltage(port[0]);
        let v2 = match boundary {
            Some(b) => b.0,
            None => volts.voltage(port[1]),
        };
        let s1 = branch_flow(model, BranchSide::End1, v1, v2, conn[0], conn[1], eps, correct);
        let s2 = branch_flow(model, BranchSide::End2, v2, v1, conn[1], conn[0], eps, correct);
        computed[0] = s1 * common.sbase;
        computed[1] = s2 * common.sbase;
    }
}

/// Eliminates the star bus of each three-winding transformer and recomputes
/// its leg flows. Transformer legs always use the reactance correction, a
/// zero-impedance winding would otherwise poison the nodal solve.
pub(crate) fn compute_star_flows(
    cfg: Res<InterpretConfig>,
    common: Res<CommonData>,
    volts: Res<BusVoltages>,
    mut stars: Query<(&StarModel, &mut ComputedFlow3)>,
) {
    if cfg.t3w_flows == T3wFlowMode::NotComputed {
        return;
    }
    let eps = cfg.reactance_epsilon;
    for (model, mut computed) in stars.iter_mut() {
        let legs: Vec<StarLeg> = model
            .legs
            .iter()
            .map(|l| StarLeg {
                y: PiModel { r: l.r, x: l.x, ..Default::default() }.series_admittance(eps, true),
                a_term: l.a_term,
                a_star: l.a_star,
                v: volts.voltage(l.bus) * Complex64::from_polar(1.0, l.clock_rad),
                connected: l.connected,
            })
            .collect();
        let v0 = star_bus_voltage(&legs, model.ysh);
        for (i, leg) in model.legs.iter().enumerate() {
            let pi = PiModel {
                r: leg.r,
                x: leg.x,
                rho1: leg.a_term.norm(),
                alpha1: leg.a_term.arg(),
                rho2: leg.a_star.norm(),
                alpha2: leg.a_star.arg(),
                ..Default::default()
            };
            let s = branch_flow(
                &pi,
                BranchSide::End1,
                legs[i].v,
                v0,
                leg.connected,
                true,
                eps,
                true,
            );
            computed[i] = s * common.sbase;
        }
    }
}

fn classify_end(
    recorded: Complex64,
    computed: Complex64,
    connected: bool,
    threshold_pu: f64,
    sbase: f64,
) -> BranchEndFlow {
    let rec_p = recorded.re;
    let rec_q = recorded.im;
    if !connected || is_nan_c(computed) {
        return BranchEndFlow {
            p_mw: 0.0,
            q_mvar: 0.0,
            p_recorded_mw: rec_p,
            q_recorded_mvar: rec_q,
            calculated: false,
            status: FlowStatus::NotCalculated,
        };
    }
    let status = if is_nan_c(recorded) {
        FlowStatus::MissingRecord
    } else if (computed - recorded).norm() / sbase > threshold_pu {
        FlowStatus::Failed
    } else {
        FlowStatus::Ok
    };
    BranchEndFlow {
        p_mw: computed.re,
        q_mvar: computed.im,
        p_recorded_mw: rec_p,
        q_recorded_mvar: rec_q,
        calculated: true,
        status,
    }
}

struct BalanceAcc {
    s: Complex64,
    known: bool,
}

fn acc_entry(acc: &mut HashMap<i64, BalanceAcc>, bus: i64) -> &mut BalanceAcc {
    acc.entry(bus)
        .or_insert(BalanceAcc { s: Complex64::new(0.0, 0.0), known: true })
}

/// Classifies every branch end against its record and sums the per-bus
/// balances into the final [`ValidationReport`].
pub(crate) fn build_validation_report(
    mut cmd: Commands,
    cfg: Res<InterpretConfig>,
    common: Res<CommonData>,
    lookup: Res<NodeLookup>,
    bus_volts: Query<&VBusPu>,
    branches: Query<(
        &Name,
        &Port2,
        &Conn2,
        &RecordedFlow2,
        &ComputedFlow2,
        Has<DanglingLine>,
    )>,
    stars: Query<(&Name, &StarModel, &RecordedFlow3, &ComputedFlow3)>,
    injections: Query<&Injection>,
    shunts: Query<&ShuntDevice>,
) {
    let sbase = common.sbase;
    let mut flows = BTreeMap::new();
    let mut acc: HashMap<i64, BalanceAcc> = HashMap::new();

    for (name, port, conn, recorded, computed, dangling) in branches.iter() {
        let ends = if dangling { 1 } else { 2 };
        for i in 0..ends {
            let entry = classify_end(recorded[i], computed[i], conn[i], cfg.flow_threshold_pu, sbase);
            if conn[i] {
                let slot = acc_entry(&mut acc, port[i]);
                if entry.calculated {
                    slot.s += Complex64::new(entry.p_mw, entry.q_mvar);
                } else {
                    slot.known = false;
                }
            }
            flows.insert(format!("{}.{}", name.as_str(), i + 1), entry);
        }
    }

    for (name, model, recorded, computed) in stars.iter() {
        for (i, leg) in model.legs.iter().enumerate() {
            let entry = classify_end(recorded[i], computed[i], leg.connected, cfg.flow_threshold_pu, sbase);
            if leg.connected {
                let slot = acc_entry(&mut acc, leg.bus);
                if entry.calculated {
                    slot.s += Complex64::new(entry.p_mw, entry.q_mvar);
                } else {
                    slot.known = false;
                }
            }
            flows.insert(format!("{}.{}", name.as_str(), i + 1), entry);
        }
    }

    for inj in injections.iter() {
        let slot = acc_entry(&mut acc, inj.bus);
        if is_nan_c(inj.s_mva) {
            slot.known = false;
        } else {
            slot.s += inj.s_mva;
        }
    }

    for shunt in shunts.iter() {
        let v = lookup
            .get_entity(shunt.bus)
            .and_then(|e| bus_volts.get(e).ok())
            .map(|v| v.0)
            .unwrap_or_else(nan_c);
        let s = shunt.injection(v, sbase);
        let slot = acc_entry(&mut acc, shunt.bus);
        if is_nan_c(s) {
            slot.known = false;
        } else {
            slot.s += s;
        }
    }

    let mut balances = BTreeMap::new();
    let mut error_mva = 0.0;
    for (bus, _) in lookup.iter() {
        let balance = match acc.get(&bus) {
            Some(a) if a.known => NodeBalance { p_mw: a.s.re, q_mvar: a.s.im, known: true },
            Some(_) => NodeBalance { p_mw: 0.0, q_mvar: 0.0, known: false },
            None => NodeBalance { p_mw: 0.0, q_mvar: 0.0, known: true },
        };
        if balance.known {
            error_mva += balance.mismatch_mva();
        }
        balances.insert(bus, balance);
    }

    cmd.insert_resource(ValidationReport {
        flows,
        balances,
        error_mva,
        flow_threshold_pu: cfg.flow_threshold_pu,
        balance_tol_mva: cfg.balance_tol_mva,
    });
}

/// Runs the flow recomputation pipeline against an already converted world.
pub trait NetworkValidation {
    fn run_validation(&mut self) -> Result<ValidationReport, InterpretError>;
}

impl NetworkValidation for InterpNet {
    fn run_validation(&mut self) -> Result<ValidationReport, InterpretError> {
        let world = self.world_mut();
        let mut schedule = Schedule::default();
        schedule.add_systems(
            (
                compute_branch_flows,
                compute_star_flows,
                build_flow_index,
                resolve_z0_flows,
                build_validation_report,
            )
                .chain(),
        );
        schedule.run(world);
        world
            .remove_resource::<ValidationReport>()
            .ok_or(InterpretError::MissingReport)
    }
}

/// Converts `model` under one mapping alternative and validates it.
pub fn validate(
    model: &GridModel,
    alt: &MappingAlternative,
    cfg: &InterpretConfig,
) -> Result<ValidationReport, InterpretError> {
    let mut net = InterpNet::default();
    net.world_mut().insert_resource(cfg.clone());
    net.load_exchange_model(model, alt)?;
    net.run_validation()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testcases;

    #[test]
    fn two_bus_snapshot_validates_clean() {
        let model = testcases::node_model();
        let report = validate(&model, &MappingAlternative::default(), &InterpretConfig::default())
            .unwrap();
        assert_eq!(report.flow_count(), 2);
        assert_eq!(report.ok_count(), 2, "{:#?}", report.flows);
        assert_eq!(report.failed_count(), 0);
        assert_eq!(report.bad_balance_count(), 0);
        assert!(report.error_mva < 1e-6);
    }

    #[test]
    fn validation_is_idempotent() {
        let model = testcases::node_model();
        let cfg = InterpretConfig::default();
        let alt = MappingAlternative::default();
        let a = validate(&model, &alt, &cfg).unwrap();
        let b = validate(&model, &alt, &cfg).unwrap();
        assert_eq!(format!("{:?}", a), format!("{:?}", b));
    }

    #[test]
    fn disconnected_end_reports_not_calculated_with_zero_flow() {
        let mut model = testcases::node_model();
        model.line.as_mut().unwrap()[0].from_connected = false;
        let report = validate(&model, &MappingAlternative::default(), &InterpretConfig::default())
            .unwrap();
        let open = &report.flows["L-01.1"];
        assert!(!open.calculated);
        assert_eq!(open.status, FlowStatus::NotCalculated);
        assert_eq!(open.p_mw, 0.0);
        assert_eq!(open.q_mvar, 0.0);
        // The far end is still computed, against the now stale record.
        let far = &report.flows["L-01.2"];
        assert!(far.calculated);
        assert_eq!(far.status, FlowStatus::Failed);
        // Neither injection matches the opened line any more.
        assert_eq!(report.bad_balance_count(), 2);
    }

    #[test]
    fn open_line_end_keeps_the_other_end_comparable() {
        let mut model = testcases::node_model();
        {
            let line = &mut model.line.as_mut().unwrap()[0];
            line.from_connected = false;
            // Record the charging-only flow an open line actually carries, as
            // a snapshot taken after the opening would.
            let zb = 400.0 * 400.0 / 100.0;
            let pi = PiModel::line(8.32 / zb, 142.4 / zb, 0.0, 6.25e-6 * zb);
            let v2 = Complex64::from_polar(403.93 / 400.0, (-1.94f64).to_radians());
            let s2 =
                branch_flow(&pi, BranchSide::End2, v2, nan_c(), true, false, 1e-4, false) * 100.0;
            line.p_to_mw = Some(s2.re);
            line.q_to_mvar = Some(s2.im);
        }
        let report = validate(&model, &MappingAlternative::default(), &InterpretConfig::default())
            .unwrap();
        assert_eq!(report.flows["L-01.1"].status, FlowStatus::NotCalculated);
        assert_eq!(report.flows["L-01.2"].status, FlowStatus::Ok);
    }

    #[test]
    fn tampered_record_fails_the_end() {
        let mut model = testcases::node_model();
        let line = &mut model.line.as_mut().unwrap()[0];
        *line.p_from_mw.as_mut().unwrap() += 1.0;
        let report = validate(&model, &MappingAlternative::default(), &InterpretConfig::default())
            .unwrap();
        assert_eq!(report.flows["L-01.1"].status, FlowStatus::Failed);
        assert_eq!(report.flows["L-01.2"].status, FlowStatus::Ok);
    }

    #[test]
    fn dangling_line_needs_boundary_state() {
        let model = testcases::dangling_model(true);
        let report = validate(&model, &MappingAlternative::default(), &InterpretConfig::default())
            .unwrap();
        assert_eq!(report.flows["DL-1.1"].status, FlowStatus::Ok);

        let model = testcases::dangling_model(false);
        let report = validate(&model, &MappingAlternative::default(), &InterpretConfig::default())
            .unwrap();
        let end = &report.flows["DL-1.1"];
        assert_eq!(end.status, FlowStatus::NotCalculated);
        assert!(!end.calculated);
    }

    #[test]
    fn three_winding_flows_can_be_disabled() {
        let model = testcases::transformer_model();
        let mut cfg = InterpretConfig::default();
        cfg.t3w_flows = T3wFlowMode::NotComputed;
        let report = validate(&model, &MappingAlternative::default(), &cfg).unwrap();
        for i in 1..=3 {
            let end = &report.flows[&format!("T3-023.{i}")];
            assert_eq!(end.status, FlowStatus::NotCalculated);
            assert!(!end.calculated);
        }
        // The legs no longer fail, their buses just lose balance information.
        assert_eq!(report.failed_count(), 0);
        assert!(report.unknown_balance_count() >= 2);
    }

    #[test]
    fn shunt_injection_feeds_the_balance_with_reactive_power_only() {
        let mut model = testcases::node_model();
        model.shunt = Some(vec![crate::io::exchange::ShuntRecord {
            id: "SH-1".to_string(),
            bus: 1,
            g_us: 1000.0,
            b_us: 6.25,
            ..Default::default()
        }]);
        let report = validate(&model, &MappingAlternative::default(), &InterpretConfig::default())
            .unwrap();
        // The uncompensated capacitor leaves about 1 Mvar on the bus; the
        // large conductance in the table leaves the active balance untouched.
        let balance = &report.balances[&1];
        assert!(balance.p_mw.abs() < 1e-9);
        assert!(balance.q_mvar > 1.0);
        assert_eq!(report.bad_balance_count(), 1);
        assert!(report.error_mva > 1.0);
        assert!(report.error_mva < 1.2);
    }

    #[test]
    fn missing_record_is_flagged_but_still_computed() {
        let mut model = testcases::node_model();
        model.line.as_mut().unwrap()[0].q_to_mvar = None;
        let report = validate(&model, &MappingAlternative::default(), &InterpretConfig::default())
            .unwrap();
        let end = &report.flows["L-01.2"];
        assert_eq!(end.status, FlowStatus::MissingRecord);
        assert!(end.calculated);
        assert!(end.p_mw.abs() > 0.0);
        // The computed flow still feeds the bus balance.
        assert_eq!(report.bad_balance_count(), 0);
    }
}
