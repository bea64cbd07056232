//! Conversion of an exchange snapshot into an ECS world, parameterised by
//! the mapping alternative under test. The snapshot itself is never altered;
//! each alternative just lands the ambiguous ratios and angles on different
//! sides of the network equations.

use std::collections::HashMap;

use bevy_ecs::name::Name;
use bevy_ecs::prelude::*;
use nalgebra::{DVector, Vector2, Vector3};
use num_complex::Complex64;

use crate::basic::ecs::elements::*;
use crate::basic::ecs::interpret::{MappingAlternative, RatioSide, StarSide};
use crate::basic::ecs::network::{DataOps, InterpNet, InterpretError};
use crate::basic::ecs::validation::InterpretConfig;
use crate::basic::flow::{PiModel, nan_c};
use crate::io::exchange::*;

pub trait LoadExchangeModel {
    fn load_exchange_model(
        &mut self,
        model: &GridModel,
        alt: &MappingAlternative,
    ) -> Result<(), InterpretError>;
}

impl LoadExchangeModel for InterpNet {
    fn load_exchange_model(
        &mut self,
        model: &GridModel,
        alt: &MappingAlternative,
    ) -> Result<(), InterpretError> {
        self.world_mut().load_exchange_model(model, alt)
    }
}

fn record(p: Option<f64>, q: Option<f64>) -> Complex64 {
    match (p, q) {
        (Some(p), Some(q)) => Complex64::new(p, q),
        _ => nan_c(),
    }
}

/// Off-nominal factor and phase angle (degrees) read from a tap changer,
/// with the phase sign flipped when the alternative says so.
fn tap_values(tap: &Option<TapChanger>, alt: &MappingAlternative) -> (f64, f64) {
    match tap {
        Some(t) => {
            let sign = if alt.negate_phase_shift { -1.0 } else { 1.0 };
            (t.ratio(), sign * t.angle_degree())
        }
        None => (1.0, 0.0),
    }
}

/// Whether a total phase shift is an actual phase-shifting angle rather than
/// a multiple-of-30° winding clock.
fn non_clock_shift(alpha_degree: f64) -> bool {
    let rem = alpha_degree.rem_euclid(30.0);
    rem.min(30.0 - rem) > 1e-9
}

impl LoadExchangeModel for World {
    fn load_exchange_model(
        &mut self,
        model: &GridModel,
        alt: &MappingAlternative,
    ) -> Result<(), InterpretError> {
        if !self.contains_resource::<InterpretConfig>() {
            self.insert_resource(InterpretConfig::default());
        }
        let cfg = self.resource::<InterpretConfig>().clone();
        let sbase = model.sn_mva;
        self.insert_resource(CommonData { sbase });

        let mut lookup = NodeLookup::default();
        let mut vn_map: HashMap<i64, f64> = HashMap::new();
        let max_index = model.bus.iter().map(|b| b.index).max().unwrap_or(-1);
        let mut volts = DVector::from_element((max_index + 1).max(0) as usize, nan_c());
        for bus in &model.bus {
            if bus.index < 0 {
                return Err(InterpretError::Conversion(format!(
                    "negative bus index {}",
                    bus.index
                )));
            }
            if bus.vn_kv <= 0.0 {
                return Err(InterpretError::Conversion(format!(
                    "bus {} has no nominal voltage",
                    bus.index
                )));
            }
            let v = match (bus.vm_kv, bus.va_degree) {
                (Some(vm), Some(va)) => Complex64::from_polar(vm / bus.vn_kv, va.to_radians()),
                _ => nan_c(),
            };
            volts[bus.index as usize] = v;
            vn_map.insert(bus.index, bus.vn_kv);
            let name = bus
                .name
                .clone()
                .unwrap_or_else(|| format!("bus-{}", bus.index));
            let entity = self
                .spawn(BusBundle {
                    name: Name::new(name),
                    id: BusID(bus.index),
                    vn: VNominal(bus.vn_kv),
                    v: VBusPu(v),
                })
                .id();
            lookup.insert(bus.index, entity);
        }
        let vn_of = |bus: i64| -> Result<f64, InterpretError> {
            vn_map.get(&bus).copied().ok_or(InterpretError::UnknownBus(bus))
        };

        for line in model.line.iter().flatten() {
            let vn = vn_of(line.from_bus)?;
            vn_of(line.to_bus)?;
            let zb = vn * vn / sbase;
            let r = line.r_ohm / zb;
            let x = line.x_ohm / zb;
            let pi = PiModel::line(r, x, line.g_us * 1e-6 * zb, line.b_us * 1e-6 * zb);
            let entity = self
                .spawn((
                    BranchBundle {
                        name: Name::new(line.id.clone()),
                        model: BranchModel(pi),
                        port: Port2(Vector2::new(line.from_bus, line.to_bus)),
                        conn: Conn2(Vector2::new(line.from_connected, line.to_connected)),
                        recorded: RecordedFlow2(Vector2::new(
                            record(line.p_from_mw, line.q_from_mvar),
                            record(line.p_to_mw, line.q_to_mvar),
                        )),
                        computed: ComputedFlow2::default(),
                    },
                    AcLine,
                ))
                .id();
            if r.abs() < cfg.z0_threshold_pu && x.abs() < cfg.z0_threshold_pu {
                self.entity_mut(entity).insert(ZeroImpedance);
            }
        }

        for dl in model.dangling_line.iter().flatten() {
            let vn = vn_of(dl.bus)?;
            let zb = vn * vn / sbase;
            let pi = PiModel::line(
                dl.r_ohm / zb,
                dl.x_ohm / zb,
                dl.g_us * 1e-6 * zb,
                dl.b_us * 1e-6 * zb,
            );
            let boundary_vn = if dl.boundary_vn_kv > 0.0 { dl.boundary_vn_kv } else { vn };
            let v_boundary = match (dl.boundary_vm_kv, dl.boundary_va_degree) {
                (Some(vm), Some(va)) => Complex64::from_polar(vm / boundary_vn, va.to_radians()),
                _ => nan_c(),
            };
            self.spawn((
                BranchBundle {
                    name: Name::new(dl.id.clone()),
                    model: BranchModel(pi),
                    port: Port2(Vector2::new(dl.bus, BOUNDARY)),
                    conn: Conn2(Vector2::new(dl.connected, true)),
                    recorded: RecordedFlow2(Vector2::new(record(dl.p_mw, dl.q_mvar), nan_c())),
                    computed: ComputedFlow2::default(),
                },
                DanglingLine,
                BoundaryVoltage(v_boundary),
            ));
        }

        for t in model.trafo2w.iter().flatten() {
            let vn_hv = vn_of(t.hv_bus)?;
            let vn_lv = vn_of(t.lv_bus)?;
            if t.rated_hv_kv <= 0.0 || t.rated_lv_kv <= 0.0 {
                return Err(InterpretError::Conversion(format!(
                    "transformer {} has no rated voltages",
                    t.id
                )));
            }
            let zb_lv = vn_lv * vn_lv / sbase;
            let r = t.r_ohm / zb_lv;
            let x = t.x_ohm / zb_lv;
            let (tap_rho, tap_alpha_deg) = tap_values(&t.tap, alt);
            let rho = (t.rated_hv_kv / vn_hv) / (t.rated_lv_kv / vn_lv) * tap_rho;
            let alpha_deg = t.shift_degree + tap_alpha_deg;
            let alpha = alpha_deg.to_radians();
            let mut pi = PiModel {
                r,
                x,
                g2: t.g_us * 1e-6 * zb_lv,
                b2: t.b_us * 1e-6 * zb_lv,
                ..Default::default()
            };
            match alt.ratio_side {
                RatioSide::End1 => {
                    pi.rho1 = rho;
                    pi.alpha1 = alpha;
                }
                RatioSide::End2 => {
                    pi.rho2 = 1.0 / rho;
                    pi.alpha2 = -alpha;
                }
            }
            let entity = self
                .spawn((
                    BranchBundle {
                        name: Name::new(t.id.clone()),
                        model: BranchModel(pi),
                        port: Port2(Vector2::new(t.hv_bus, t.lv_bus)),
                        conn: Conn2(Vector2::new(t.hv_connected, t.lv_connected)),
                        recorded: RecordedFlow2(Vector2::new(
                            record(t.p_hv_mw, t.q_hv_mvar),
                            record(t.p_lv_mw, t.q_lv_mvar),
                        )),
                        computed: ComputedFlow2::default(),
                    },
                    Trafo2w,
                ))
                .id();
            if non_clock_shift(alpha_deg) {
                self.entity_mut(entity).insert(NonClockShift);
            }
            if r.abs() < cfg.z0_threshold_pu && x.abs() < cfg.z0_threshold_pu {
                self.entity_mut(entity).insert(ZeroImpedance);
            }
        }

        for t in model.trafo3w.iter().flatten() {
            let mut legs = [StarLegParam {
                bus: 0,
                r: 0.0,
                x: 0.0,
                a_term: Complex64::new(1.0, 0.0),
                a_star: Complex64::new(1.0, 0.0),
                clock_rad: 0.0,
                connected: false,
            }; 3];
            let mut recorded = Vector3::repeat(nan_c());
            for (i, leg) in t.legs.iter().enumerate() {
                let vn = vn_of(leg.bus)?;
                if leg.rated_kv <= 0.0 {
                    return Err(InterpretError::Conversion(format!(
                        "transformer {} leg {} has no rated voltage",
                        t.id,
                        i + 1
                    )));
                }
                let zb = leg.rated_kv * leg.rated_kv / sbase;
                let (tap_rho, tap_alpha_deg) = tap_values(&leg.tap, alt);
                let a = Complex64::from_polar(
                    leg.rated_kv / vn * tap_rho,
                    tap_alpha_deg.to_radians(),
                );
                let (a_term, a_star) = match alt.star_side {
                    StarSide::Network => (a, Complex64::new(1.0, 0.0)),
                    StarSide::Star => (Complex64::new(1.0, 0.0), a.inv()),
                };
                legs[i] = StarLegParam {
                    bus: leg.bus,
                    r: leg.r_ohm / zb,
                    x: leg.x_ohm / zb,
                    a_term,
                    a_star,
                    clock_rad: (leg.clock as f64 * 30.0).to_radians(),
                    connected: leg.connected,
                };
                recorded[i] = record(leg.p_mw, leg.q_mvar);
            }
            let zb1 = t.legs[0].rated_kv * t.legs[0].rated_kv / sbase;
            let ysh = Complex64::new(t.g_us * 1e-6, t.b_us * 1e-6) * zb1;
            self.spawn((
                StarBundle {
                    name: Name::new(t.id.clone()),
                    model: StarModel { legs, ysh },
                    recorded: RecordedFlow3(recorded),
                    computed: ComputedFlow3::default(),
                },
                Trafo3w,
            ));
        }

        for load in model.load.iter().flatten() {
            if !load.connected {
                continue;
            }
            vn_of(load.bus)?;
            self.spawn((
                Name::new(load.id.clone()),
                Injection { bus: load.bus, s_mva: -record(load.p_mw, load.q_mvar) },
            ));
        }

        for g in model.r#gen.iter().flatten() {
            if !g.connected {
                continue;
            }
            vn_of(g.bus)?;
            self.spawn((
                Name::new(g.id.clone()),
                Injection { bus: g.bus, s_mva: record(g.p_mw, g.q_mvar) },
            ));
        }

        for sh in model.shunt.iter().flatten() {
            if !sh.connected {
                continue;
            }
            let vn = vn_of(sh.bus)?;
            let zb = vn * vn / sbase;
            // Conductance in the shunt table never enters the sums; shunts
            // contribute reactive power only.
            self.spawn((
                Name::new(sh.id.clone()),
                ShuntDevice { bus: sh.bus, b: sh.b_us * 1e-6 * zb },
            ));
        }

        self.insert_resource(lookup);
        self.insert_resource(BusVoltages(volts));
        Ok(())
    }
}
