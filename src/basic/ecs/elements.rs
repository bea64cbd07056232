use std::collections::HashMap;

use bevy_ecs::entity::EntityHash;
use bevy_ecs::name::Name;
use bevy_ecs::prelude::*;
use derive_more::{Deref, DerefMut};
use nalgebra::{DVector, Vector2, Vector3};
use num_complex::Complex64;

use crate::basic::flow::{PiModel, nan_c};

/// Numeric identifier of a bus in the exchange model.
#[derive(Debug, Component, Deref, DerefMut, Clone, Copy, PartialEq, Eq)]
pub struct BusID(pub i64);

/// Nominal voltage of a bus in kV, the per-unit voltage base.
#[derive(Debug, Component, Deref, DerefMut, Default, Clone, Copy)]
pub struct VNominal(pub f64);

/// Recorded bus voltage phasor in per-unit. NaN when the snapshot carries no
/// state for the bus.
#[derive(Debug, Component, Deref, DerefMut, Clone, Copy)]
pub struct VBusPu(pub Complex64);

impl Default for VBusPu {
    fn default() -> Self {
        Self(nan_c())
    }
}

#[derive(Bundle)]
pub struct BusBundle {
    pub name: Name,
    pub id: BusID,
    pub vn: VNominal,
    pub v: VBusPu,
}

/// Resource that maps bus indices (i64) to ECS entities and back.
#[derive(Default, Debug, Resource)]
pub struct NodeLookup {
    pub forward: Vec<Option<Entity>>,
    pub reverse: HashMap<Entity, i64, EntityHash>,
}

impl NodeLookup {
    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, Entity)> + '_ {
        self.forward
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|e| (i as i64, e)))
    }

    pub fn insert(&mut self, bus_id: i64, entity: Entity) {
        let idx = bus_id as usize;
        if self.forward.len() <= idx {
            self.forward.resize_with(idx + 1, || None);
        }
        self.forward[idx] = Some(entity);
        self.reverse.insert(entity, bus_id);
    }

    pub fn get_entity(&self, bus_id: i64) -> Option<Entity> {
        self.forward.get(bus_id as usize).copied().flatten()
    }

    pub fn get_id(&self, entity: Entity) -> Option<i64> {
        self.reverse.get(&entity).copied()
    }
}

/// Bus voltage phasors indexed by bus id, NaN for buses without state.
#[derive(Debug, Resource, Deref, DerefMut, Clone)]
pub struct BusVoltages(pub DVector<Complex64>);

impl BusVoltages {
    pub fn voltage(&self, bus: i64) -> Complex64 {
        if bus < 0 || bus as usize >= self.0.len() {
            return nan_c();
        }
        self.0[bus as usize]
    }
}

/// Common base values shared by all conversions and flow computations.
#[derive(Debug, Resource, Clone, Copy)]
pub struct CommonData {
    /// Base apparent power in MVA.
    pub sbase: f64,
}

/// π-equivalent parameters of a two-port branch.
#[derive(Debug, Component, Deref, DerefMut, Clone, PartialEq)]
pub struct BranchModel(pub PiModel);

/// Bus indices at the two ends of a branch. The boundary end of a dangling
/// line uses [`BOUNDARY`].
#[derive(Component, Deref, DerefMut, Default, Debug, Clone, PartialEq)]
pub struct Port2(pub Vector2<i64>);

/// Pseudo bus id for the boundary side of a dangling line.
pub const BOUNDARY: i64 = -1;

/// Connection state of the two branch ends.
#[derive(Component, Deref, DerefMut, Debug, Clone, PartialEq)]
pub struct Conn2(pub Vector2<bool>);

/// Flows recorded in the exchange snapshot at the two branch ends, as complex
/// power injected into the adjacent bus, in MVA. NaN marks a missing record.
#[derive(Component, Deref, DerefMut, Debug, Clone, PartialEq)]
pub struct RecordedFlow2(pub Vector2<Complex64>);

/// Flows recomputed from the bus voltages at the two branch ends, same
/// convention and unit as [`RecordedFlow2`]. NaN until a system fills it in.
#[derive(Component, Deref, DerefMut, Debug, Clone, PartialEq)]
pub struct ComputedFlow2(pub Vector2<Complex64>);

impl Default for ComputedFlow2 {
    fn default() -> Self {
        Self(Vector2::repeat(nan_c()))
    }
}

/// Recorded flows at the three legs of a three-winding transformer, MVA.
#[derive(Component, Deref, DerefMut, Debug, Clone, PartialEq)]
pub struct RecordedFlow3(pub Vector3<Complex64>);

/// Recomputed flows at the three legs, MVA.
#[derive(Component, Deref, DerefMut, Debug, Clone, PartialEq)]
pub struct ComputedFlow3(pub Vector3<Complex64>);

impl Default for ComputedFlow3 {
    fn default() -> Self {
        Self(Vector3::repeat(nan_c()))
    }
}

/// Boundary-node voltage of a dangling line in per-unit, NaN when the
/// boundary state is not part of the snapshot.
#[derive(Component, Deref, DerefMut, Debug, Clone, Copy)]
pub struct BoundaryVoltage(pub Complex64);

/// Marker component for an AC line.
#[derive(Debug, Component, Default)]
pub struct AcLine;

/// Marker component for a line with only one end inside the model.
#[derive(Debug, Component, Default)]
pub struct DanglingLine;

/// Marker component for a two-winding transformer.
#[derive(Debug, Component, Default)]
pub struct Trafo2w;

/// Marker component for a three-winding transformer.
#[derive(Debug, Component, Default)]
pub struct Trafo3w;

/// Marker for branches whose series impedance is below the zero-impedance
/// threshold; their flows come from balance propagation, not the π kernel.
#[derive(Debug, Component, Default)]
pub struct ZeroImpedance;

/// Marker for transformers whose total phase shift is not a multiple of 30°,
/// i.e. an actual phase-shifting device rather than a winding clock.
#[derive(Debug, Component, Default)]
pub struct NonClockShift;

#[derive(Bundle)]
pub struct BranchBundle {
    pub name: Name,
    pub model: BranchModel,
    pub port: Port2,
    pub conn: Conn2,
    pub recorded: RecordedFlow2,
    pub computed: ComputedFlow2,
}

/// One winding of a three-winding transformer as stored on the entity:
/// per-unit impedance, the ideal ratio split between terminal and star side
/// according to the active mapping alternative, and the winding clock.
#[derive(Debug, Clone, Copy)]
pub struct StarLegParam {
    pub bus: i64,
    pub r: f64,
    pub x: f64,
    pub a_term: Complex64,
    pub a_star: Complex64,
    pub clock_rad: f64,
    pub connected: bool,
}

/// Star-equivalent of a three-winding transformer with the magnetizing
/// admittance attached to the internal star node.
#[derive(Debug, Component, Clone)]
pub struct StarModel {
    pub legs: [StarLegParam; 3],
    pub ysh: Complex64,
}

#[derive(Bundle)]
pub struct StarBundle {
    pub name: Name,
    pub model: StarModel,
    pub recorded: RecordedFlow3,
    pub computed: ComputedFlow3,
}

/// Fixed complex power injection into a bus (generation positive, load
/// negative), in MVA. NaN when the snapshot has no record for the device.
#[derive(Debug, Component, Clone, Copy)]
pub struct Injection {
    pub bus: i64,
    pub s_mva: Complex64,
}

/// Shunt susceptance on a bus, per-unit on the bus voltage base. Its
/// injection follows the bus voltage instead of being a fixed record, and is
/// purely reactive: shunts contribute Q only to every bus sum.
#[derive(Debug, Component, Clone, Copy)]
pub struct ShuntDevice {
    pub bus: i64,
    pub b: f64,
}

impl ShuntDevice {
    /// Reactive power injected into the bus in MVA for voltage `v` (pu).
    pub fn injection(&self, v: Complex64, sbase: f64) -> Complex64 {
        Complex64::new(0.0, self.b * v.norm_sqr()) * sbase
    }
}
