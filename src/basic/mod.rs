pub mod ecs;
pub(crate) mod flow;
pub(crate) mod starbus;
pub(crate) mod z0;

pub use flow::{BranchSide, PiModel, branch_flow, is_nan_c, nan_c};
pub use starbus::{StarLeg, star_bus_voltage};
pub use z0::{FlowIndex, TerminalFlow, TerminalKind, Z0Branch, Z0Solve};
