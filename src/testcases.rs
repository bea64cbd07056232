//! Built-in exchange snapshots used by the tests. Every fixture carries
//! recorded flows that are exactly consistent with its voltages under one
//! reference mapping convention, so a correct interpretation can drive the
//! comparison error to zero.

use num_complex::Complex64;

use crate::basic::ecs::interpret::MappingAlternative;
use crate::basic::ecs::validation::{InterpretConfig, validate};
use crate::basic::flow::{BranchSide, PiModel, branch_flow};
use crate::io::exchange::*;

const SBASE: f64 = 100.0;

fn bus_v(vm_kv: f64, va_degree: f64, vn_kv: f64) -> Complex64 {
    Complex64::from_polar(vm_kv / vn_kv, va_degree.to_radians())
}

/// End flows of a line in MVA, computed with the same per-unit conversion the
/// engine applies, so fixture records match recomputed flows bit for bit.
fn line_flows_ohm(
    r_ohm: f64,
    x_ohm: f64,
    b_us: f64,
    vn_kv: f64,
    v1: Complex64,
    v2: Complex64,
) -> (Complex64, Complex64) {
    let zb = vn_kv * vn_kv / SBASE;
    let cfg = InterpretConfig::default();
    let pi = PiModel::line(r_ohm / zb, x_ohm / zb, 0.0, b_us * 1e-6 * zb);
    let eps = cfg.reactance_epsilon;
    let correct = cfg.apply_reactance_correction;
    let s1 = branch_flow(&pi, BranchSide::End1, v1, v2, true, true, eps, correct) * SBASE;
    let s2 = branch_flow(&pi, BranchSide::End2, v2, v1, true, true, eps, correct) * SBASE;
    (s1, s2)
}

/// Two buses joined by one line, 100 MVA / 400 kV base, with a generator and
/// a load closing the balance. The classic smallest possible snapshot.
pub fn node_model() -> GridModel {
    let vn = 400.0;
    let v0 = bus_v(400.0, 0.0, vn);
    let v1 = bus_v(403.93, -1.94, vn);
    let (s1, s2) = line_flows_ohm(8.32, 142.4, 6.25, vn, v0, v1);
    GridModel {
        bus: vec![
            BusRecord {
                index: 0,
                vn_kv: vn,
                vm_kv: Some(400.0),
                va_degree: Some(0.0),
                ..Default::default()
            },
            BusRecord {
                index: 1,
                vn_kv: vn,
                vm_kv: Some(403.93),
                va_degree: Some(-1.94),
                ..Default::default()
            },
        ],
        line: Some(vec![LineRecord {
            id: "L-01".to_string(),
            from_bus: 0,
            to_bus: 1,
            r_ohm: 8.32,
            x_ohm: 142.4,
            b_us: 6.25,
            p_from_mw: Some(s1.re),
            q_from_mvar: Some(s1.im),
            p_to_mw: Some(s2.re),
            q_to_mvar: Some(s2.im),
            ..Default::default()
        }]),
        r#gen: Some(vec![GenRecord {
            id: "G-0".to_string(),
            bus: 0,
            p_mw: Some(-s1.re),
            q_mvar: Some(-s1.im),
            ..Default::default()
        }]),
        load: Some(vec![LoadRecord {
            id: "LD-1".to_string(),
            bus: 1,
            p_mw: Some(s2.re),
            q_mvar: Some(s2.im),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// One bus with a dangling line to a boundary node. With
/// `with_boundary_state` the boundary voltage is part of the snapshot and the
/// network-end flow can be recomputed; without it the end stays uncalculated.
pub fn dangling_model(with_boundary_state: bool) -> GridModel {
    let vn = 400.0;
    let v0 = bus_v(400.0, 0.0, vn);
    let vb = bus_v(399.0, -1.2, vn);
    let (s1, _) = line_flows_ohm(8.32, 142.4, 6.25, vn, v0, vb);
    GridModel {
        bus: vec![BusRecord {
            index: 0,
            vn_kv: vn,
            vm_kv: Some(400.0),
            va_degree: Some(0.0),
            ..Default::default()
        }],
        dangling_line: Some(vec![DanglingLineRecord {
            id: "DL-1".to_string(),
            bus: 0,
            r_ohm: 8.32,
            x_ohm: 142.4,
            b_us: 6.25,
            p_mw: Some(s1.re),
            q_mvar: Some(s1.im),
            boundary_vn_kv: vn,
            boundary_vm_kv: with_boundary_state.then_some(399.0),
            boundary_va_degree: with_boundary_state.then_some(-1.2),
            ..Default::default()
        }]),
        r#gen: Some(vec![GenRecord {
            id: "G-0".to_string(),
            bus: 0,
            p_mw: Some(-s1.re),
            q_mvar: Some(-s1.im),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Four nodes: two real lines 0-1-2 and a zero-impedance stub from bus 2 to
/// the tiny station bus 3. With `z0_connected` the stub carries the station
/// load; without it the stub is an antenna, open at bus 2, and the station
/// island is self-balanced at zero.
pub fn kron_antenna_model(z0_connected: bool) -> GridModel {
    let vn = 400.0;
    let v0 = bus_v(400.0, 0.0, vn);
    let v1 = bus_v(403.93, -1.94, vn);
    let v2 = bus_v(400.0, -3.0, vn);
    let (sa1, sa2) = line_flows_ohm(8.32, 142.4, 6.25, vn, v0, v1);
    let (sb1, sb2) = line_flows_ohm(6.4, 96.0, 5.0, vn, v1, v2);
    let station_load = if z0_connected {
        Complex64::new(20.0, 5.0)
    } else {
        Complex64::new(0.0, 0.0)
    };
    // Injections balancing buses 1 and 2 exactly.
    let mid = sa2 + sb1;
    let end = if z0_connected { sb2 - station_load } else { sb2 };

    let mk_bus = |index: i64, vm: f64, va: f64| BusRecord {
        index,
        vn_kv: vn,
        vm_kv: Some(vm),
        va_degree: Some(va),
        ..Default::default()
    };
    GridModel {
        bus: vec![
            mk_bus(0, 400.0, 0.0),
            mk_bus(1, 403.93, -1.94),
            mk_bus(2, 400.0, -3.0),
            mk_bus(3, 400.0, -3.0),
        ],
        line: Some(vec![
            LineRecord {
                id: "L-01".to_string(),
                from_bus: 0,
                to_bus: 1,
                r_ohm: 8.32,
                x_ohm: 142.4,
                b_us: 6.25,
                p_from_mw: Some(sa1.re),
                q_from_mvar: Some(sa1.im),
                p_to_mw: Some(sa2.re),
                q_to_mvar: Some(sa2.im),
                ..Default::default()
            },
            LineRecord {
                id: "L-12".to_string(),
                from_bus: 1,
                to_bus: 2,
                r_ohm: 6.4,
                x_ohm: 96.0,
                b_us: 5.0,
                p_from_mw: Some(sb1.re),
                q_from_mvar: Some(sb1.im),
                p_to_mw: Some(sb2.re),
                q_to_mvar: Some(sb2.im),
                ..Default::default()
            },
            LineRecord {
                id: "Z0-2T".to_string(),
                from_bus: 3,
                to_bus: 2,
                to_connected: z0_connected,
                p_from_mw: Some(station_load.re),
                q_from_mvar: Some(station_load.im),
                p_to_mw: z0_connected.then_some(-station_load.re),
                q_to_mvar: z0_connected.then_some(-station_load.im),
                ..Default::default()
            },
        ]),
        load: Some(vec![
            LoadRecord {
                id: "LD-1".to_string(),
                bus: 1,
                p_mw: Some(mid.re),
                q_mvar: Some(mid.im),
                ..Default::default()
            },
            LoadRecord {
                id: "LD-2".to_string(),
                bus: 2,
                p_mw: Some(end.re),
                q_mvar: Some(end.im),
                ..Default::default()
            },
            LoadRecord {
                id: "LD-T".to_string(),
                bus: 3,
                p_mw: Some(station_load.re),
                q_mvar: Some(station_load.im),
                ..Default::default()
            },
        ]),
        r#gen: Some(vec![GenRecord {
            id: "G-0".to_string(),
            bus: 0,
            p_mw: Some(-sa1.re),
            q_mvar: Some(-sa1.im),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn transformer_skeleton() -> GridModel {
    GridModel {
        bus: vec![
            BusRecord {
                index: 0,
                vn_kv: 400.0,
                vm_kv: Some(400.0),
                va_degree: Some(0.0),
                ..Default::default()
            },
            BusRecord {
                index: 1,
                vn_kv: 110.0,
                vm_kv: Some(112.2),
                va_degree: Some(-2.0),
                ..Default::default()
            },
            BusRecord {
                index: 2,
                vn_kv: 220.0,
                vm_kv: Some(225.0),
                va_degree: Some(-1.0),
                ..Default::default()
            },
            BusRecord {
                index: 3,
                vn_kv: 20.0,
                vm_kv: Some(20.2),
                va_degree: Some(-2.5),
                ..Default::default()
            },
            BusRecord {
                index: 4,
                vn_kv: 400.0,
                vm_kv: Some(398.0),
                va_degree: Some(-4.0),
                ..Default::default()
            },
        ],
        trafo2w: Some(vec![
            Trafo2wRecord {
                id: "T2-01".to_string(),
                hv_bus: 0,
                lv_bus: 1,
                rated_hv_kv: 400.0,
                rated_lv_kv: 110.0,
                r_ohm: 0.5,
                x_ohm: 10.0,
                g_us: 0.4,
                b_us: -1.5,
                tap: Some(TapChanger {
                    neutral: 0.0,
                    pos: 2.0,
                    step_percent: 1.25,
                    step_degree: 0.0,
                }),
                ..Default::default()
            },
            Trafo2wRecord {
                id: "PS-04".to_string(),
                hv_bus: 0,
                lv_bus: 4,
                rated_hv_kv: 400.0,
                rated_lv_kv: 400.0,
                r_ohm: 0.2,
                x_ohm: 8.0,
                tap: Some(TapChanger {
                    neutral: 0.0,
                    pos: 2.0,
                    step_percent: 0.0,
                    step_degree: 5.0,
                }),
                ..Default::default()
            },
        ]),
        trafo3w: Some(vec![Trafo3wRecord {
            id: "T3-023".to_string(),
            g_us: 0.5,
            b_us: -3.0,
            legs: [
                TrafoLegRecord {
                    bus: 0,
                    rated_kv: 400.0,
                    r_ohm: 0.8,
                    x_ohm: 30.0,
                    tap: Some(TapChanger {
                        neutral: 0.0,
                        pos: 1.0,
                        step_percent: 2.0,
                        step_degree: 0.0,
                    }),
                    ..Default::default()
                },
                TrafoLegRecord {
                    bus: 2,
                    rated_kv: 220.0,
                    r_ohm: 0.4,
                    x_ohm: 12.0,
                    ..Default::default()
                },
                TrafoLegRecord {
                    bus: 3,
                    rated_kv: 20.0,
                    r_ohm: 0.05,
                    x_ohm: 0.6,
                    clock: 1,
                    ..Default::default()
                },
            ],
        }]),
        ..Default::default()
    }
}

/// Transformer playground: a ratio-tapped two-winding unit, a phase shifter
/// and a three-winding unit. Recorded flows are generated under the reference
/// convention (ratios at end 1, leg ratios on the network side, direct phase
/// shift), so interpretation must recover exactly that alternative.
pub fn transformer_model() -> GridModel {
    let mut model = transformer_skeleton();
    let report = validate(
        &model,
        &MappingAlternative::default(),
        &InterpretConfig::default(),
    )
    .unwrap();
    let flow = |key: &str| {
        let end = &report.flows[key];
        (Some(end.p_mw), Some(end.q_mvar))
    };

    {
        let t2 = &mut model.trafo2w.as_mut().unwrap()[0];
        (t2.p_hv_mw, t2.q_hv_mvar) = flow("T2-01.1");
        (t2.p_lv_mw, t2.q_lv_mvar) = flow("T2-01.2");
        let ps = &mut model.trafo2w.as_mut().unwrap()[1];
        (ps.p_hv_mw, ps.q_hv_mvar) = flow("PS-04.1");
        (ps.p_lv_mw, ps.q_lv_mvar) = flow("PS-04.2");
        let t3 = &mut model.trafo3w.as_mut().unwrap()[0];
        for i in 0..3 {
            let key = format!("T3-023.{}", i + 1);
            (t3.legs[i].p_mw, t3.legs[i].q_mvar) = flow(&key);
        }
    }

    let mut loads = Vec::new();
    let mut gens = Vec::new();
    for (bus, balance) in &report.balances {
        if *bus == 0 {
            gens.push(GenRecord {
                id: "G-0".to_string(),
                bus: 0,
                p_mw: Some(-balance.p_mw),
                q_mvar: Some(-balance.q_mvar),
                ..Default::default()
            });
        } else {
            loads.push(LoadRecord {
                id: format!("LD-{bus}"),
                bus: *bus,
                p_mw: Some(balance.p_mw),
                q_mvar: Some(balance.q_mvar),
                ..Default::default()
            });
        }
    }
    model.load = Some(loads);
    model.r#gen = Some(gens);
    model
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_model_records_match_the_documented_flow() {
        let model = node_model();
        let line = &model.line.as_ref().unwrap()[0];
        assert!((line.p_from_mw.unwrap() - (-37.685531)).abs() < 5e-2);
        assert!((line.q_from_mvar.unwrap() - 13.094454).abs() < 5e-2);
    }

    #[test]
    fn fixtures_are_internally_balanced() {
        for model in [
            node_model(),
            kron_antenna_model(true),
            kron_antenna_model(false),
            transformer_model(),
        ] {
            let report = validate(
                &model,
                &MappingAlternative::default(),
                &InterpretConfig::default(),
            )
            .unwrap();
            assert_eq!(report.failed_count(), 0, "{:#?}", report.flows);
            assert_eq!(report.bad_balance_count(), 0);
            assert!(report.error_mva < 1.0);
        }
    }
}
