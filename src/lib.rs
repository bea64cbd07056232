mod basic;
pub mod io;
pub mod testcases;
pub mod prelude {
    use crate::basic;
    pub use crate::io::exchange;
    pub use basic::*;

    pub use basic::ecs::{
        elements::*,
        interpret::{
            AlternativeCatalogue, AlternativeOutcome, FlowFill, InterpretationResult, Interpreter,
            MappingAlternative, RatioSide, StarSide,
        },
        network::{DataOps, InterpNet, InterpretError},
        report::{ReportTables, SummaryTables},
        validation::{
            BranchEndFlow, FlowStatus, InterpretConfig, NetworkValidation, NodeBalance,
            T3wFlowMode, ValidationReport, validate,
        },
    };
    pub use crate::io::conv::LoadExchangeModel;
}
