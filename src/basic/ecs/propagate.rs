use bevy_ecs::prelude::*;

use crate::basic::flow::{BranchSide, nan_c};
use crate::basic::z0::{FlowIndex, TerminalKind, Z0Branch, Z0Solve};

use super::elements::*;
use super::validation::InterpretConfig;

/// Terminal-flow index of the whole network plus the entities of the
/// zero-impedance branches, aligned with [`FlowIndex::z0`].
#[derive(Resource)]
pub(crate) struct Z0Index {
    pub index: FlowIndex,
    pub entities: Vec<Entity>,
}

/// Collects every connected terminal flow into a per-bus index. Runs after
/// the kernel systems so line, transformer and leg flows are final; only
/// zero-impedance branches are still unknown at this point.
pub(crate) fn build_flow_index(
    mut cmd: Commands,
    common: Res<CommonData>,
    volts: Res<BusVoltages>,
    branches: Query<(
        Entity,
        &Port2,
        &Conn2,
        &ComputedFlow2,
        Has<Trafo2w>,
        Has<NonClockShift>,
        Has<ZeroImpedance>,
        Has<DanglingLine>,
    )>,
    stars: Query<(&StarModel, &ComputedFlow3)>,
    injections: Query<&Injection>,
    shunts: Query<&ShuntDevice>,
) {
    let mut index = FlowIndex::default();
    let mut entities = Vec::new();

    for (entity, port, conn, computed, is_trafo, shifting, is_z0, dangling) in branches.iter() {
        if is_z0 {
            let id = index.z0.len();
            index.z0.push(Z0Branch { bus1: port[0], bus2: port[1] });
            entities.push(entity);
            for i in 0..2 {
                if conn[i] {
                    index.push(port[i], TerminalKind::Z0(id), nan_c());
                }
            }
            continue;
        }
        let ends = if dangling { 1 } else { 2 };
        for i in 0..ends {
            if !conn[i] {
                continue;
            }
            let kind = if is_trafo {
                TerminalKind::Transformer { phase_shifting: shifting }
            } else {
                TerminalKind::Branch
            };
            index.push(port[i], kind, computed[i]);
        }
    }

    for (model, computed) in stars.iter() {
        for (i, leg) in model.legs.iter().enumerate() {
            if !leg.connected {
                continue;
            }
            let phase_shifting = leg.a_term.arg() != 0.0 || leg.a_star.arg() != 0.0;
            index.push(leg.bus, TerminalKind::Transformer { phase_shifting }, computed[i]);
        }
    }

    for inj in injections.iter() {
        index.push(inj.bus, TerminalKind::Injection, inj.s_mva);
    }

    for shunt in shunts.iter() {
        let s = shunt.injection(volts.voltage(shunt.bus), common.sbase);
        index.push(shunt.bus, TerminalKind::Shunt, s);
    }

    cmd.insert_resource(Z0Index { index, entities });
}

/// Recovers zero-impedance branch flows by balance propagation. A branch left
/// unresolved (cycle or unknown neighbour) keeps its NaN flow and ends up
/// not-calculated in the report.
pub(crate) fn resolve_z0_flows(
    cfg: Res<InterpretConfig>,
    idx: Option<Res<Z0Index>>,
    mut branches: Query<(&Conn2, &mut ComputedFlow2), With<ZeroImpedance>>,
) {
    let Some(idx) = idx else { return };
    let solver = Z0Solve {
        index: &idx.index,
        ptc_unknown_contributing: cfg.ptc_unknown_contributing,
    };
    for (i, &entity) in idx.entities.iter().enumerate() {
        let Ok((conn, mut computed)) = branches.get_mut(entity) else {
            continue;
        };
        match (conn[0], conn[1]) {
            (true, true) => {
                if let Some((local, other)) = solver.resolve(i, BranchSide::End1) {
                    computed[0] = local;
                    computed[1] = other;
                } else if let Some((local, other)) = solver.resolve(i, BranchSide::End2) {
                    computed[1] = local;
                    computed[0] = other;
                }
            }
            (true, false) => {
                if let Some((local, _)) = solver.resolve(i, BranchSide::End1) {
                    computed[0] = local;
                }
            }
            (false, true) => {
                if let Some((local, _)) = solver.resolve(i, BranchSide::End2) {
                    computed[1] = local;
                }
            }
            (false, false) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::basic::ecs::interpret::MappingAlternative;
    use crate::basic::ecs::validation::{FlowStatus, InterpretConfig, validate};
    use crate::testcases;

    #[test]
    fn zero_impedance_flow_is_recovered_from_the_balance() {
        let model = testcases::kron_antenna_model(true);
        let report = validate(&model, &MappingAlternative::default(), &InterpretConfig::default())
            .unwrap();
        assert_eq!(report.flows["Z0-2T.1"].status, FlowStatus::Ok, "{:#?}", report.flows);
        assert_eq!(report.flows["Z0-2T.2"].status, FlowStatus::Ok);
        assert_eq!(report.failed_count(), 0);
        assert_eq!(report.bad_balance_count(), 0);
        assert!(report.error_mva < 1.0);
    }

    #[test]
    fn kron_antenna_keeps_the_connected_end_balanced() {
        let model = testcases::kron_antenna_model(false);
        let report = validate(&model, &MappingAlternative::default(), &InterpretConfig::default())
            .unwrap();
        let open = &report.flows["Z0-2T.2"];
        assert_eq!(open.status, FlowStatus::NotCalculated);
        let closed = &report.flows["Z0-2T.1"];
        assert_eq!(closed.status, FlowStatus::Ok);
        assert!(closed.p_mw.abs() < 1e-9);
        assert_eq!(report.bad_balance_count(), 0);
        assert!(report.error_mva < 1.0);
    }
}
