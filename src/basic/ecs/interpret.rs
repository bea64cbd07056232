use std::collections::HashMap;
use std::fmt;

use derive_more::{Deref, DerefMut};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::io::exchange::GridModel;

use super::network::InterpretError;
use super::validation::{InterpretConfig, ValidationReport, validate};

/// Which transformer end the exchanged ratio and tap data refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RatioSide {
    #[default]
    End1,
    End2,
}

/// Whether three-winding leg ratios map the network side or the star side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StarSide {
    #[default]
    Network,
    Star,
}

/// One convention hypothesis for reading the ambiguous parts of an exchange
/// model. The snapshot data itself never changes between alternatives, only
/// how it is mapped onto the network equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MappingAlternative {
    pub ratio_side: RatioSide,
    pub star_side: StarSide,
    /// Read phase-tap angles with the opposite sign.
    pub negate_phase_shift: bool,
}

impl fmt::Display for MappingAlternative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ratio = match self.ratio_side {
            RatioSide::End1 => "end1",
            RatioSide::End2 => "end2",
        };
        let star = match self.star_side {
            StarSide::Network => "network",
            StarSide::Star => "star",
        };
        let shift = if self.negate_phase_shift { "negated" } else { "direct" };
        write!(f, "ratio:{ratio}|star:{star}|shift:{shift}")
    }
}

/// Ordered set of alternatives to try. The default catalogue is the full
/// cross product of the three convention choices; its order breaks ties, so
/// two equally good interpretations always select the same winner.
#[derive(Debug, Clone, Deref, DerefMut)]
pub struct AlternativeCatalogue(pub Vec<MappingAlternative>);

impl Default for AlternativeCatalogue {
    fn default() -> Self {
        let mut all = Vec::with_capacity(8);
        for ratio_side in [RatioSide::End1, RatioSide::End2] {
            for star_side in [StarSide::Network, StarSide::Star] {
                for negate_phase_shift in [false, true] {
                    all.push(MappingAlternative { ratio_side, star_side, negate_phase_shift });
                }
            }
        }
        Self(all)
    }
}

/// What happened to one alternative: a full validation report, or the reason
/// its conversion was rejected.
#[derive(Debug, Clone)]
pub enum AlternativeOutcome {
    Validated(ValidationReport),
    Failed(String),
}

/// Every evaluated alternative plus the selected best one.
#[derive(Debug, Clone)]
pub struct InterpretationResult {
    pub outcomes: HashMap<MappingAlternative, AlternativeOutcome>,
    /// Evaluation order, for deterministic iteration and tie-breaking.
    pub order: Vec<MappingAlternative>,
    pub best: MappingAlternative,
}

impl InterpretationResult {
    pub fn report(&self, alt: &MappingAlternative) -> Option<&ValidationReport> {
        match self.outcomes.get(alt) {
            Some(AlternativeOutcome::Validated(report)) => Some(report),
            _ => None,
        }
    }

    /// Report of the selected alternative. The selector only ever picks a
    /// validated alternative, so this is `None` only for a hand-built result.
    pub fn best_report(&self) -> Option<&ValidationReport> {
        self.report(&self.best)
    }
}

/// Hook for completing a model with externally computed flows before
/// interpretation, e.g. from a load-flow run.
pub trait FlowFill {
    fn fill(&self, model: &mut GridModel);
}

/// Enumerates mapping alternatives over a model and selects the one whose
/// recomputed flows match the snapshot best.
#[derive(Default)]
pub struct Interpreter {
    pub catalogue: AlternativeCatalogue,
    pub config: InterpretConfig,
    flow_fill: Option<Box<dyn FlowFill>>,
}

impl Interpreter {
    pub fn new(config: InterpretConfig) -> Self {
        Self { config, ..Default::default() }
    }

    pub fn with_catalogue(mut self, catalogue: AlternativeCatalogue) -> Self {
        self.catalogue = catalogue;
        self
    }

    pub fn with_flow_fill(mut self, fill: Box<dyn FlowFill>) -> Self {
        self.flow_fill = Some(fill);
        self
    }

    /// Validates the model under every catalogue alternative and picks the
    /// best: fewest failed flows, then smallest balance error, then earliest
    /// catalogue position.
    pub fn interpret(&self, model: &GridModel) -> Result<InterpretationResult, InterpretError> {
        let filled;
        let model = match &self.flow_fill {
            Some(fill) => {
                let mut m = model.clone();
                fill.fill(&mut m);
                filled = m;
                &filled
            }
            None => model,
        };

        let mut outcomes = HashMap::new();
        let mut order = Vec::new();
        for alt in self.catalogue.iter() {
            let outcome = match validate(model, alt, &self.config) {
                Ok(report) => AlternativeOutcome::Validated(report),
                Err(e) => AlternativeOutcome::Failed(e.to_string()),
            };
            let perfect = match &outcome {
                AlternativeOutcome::Validated(r) => {
                    r.failed_count() == 0 && r.bad_balance_count() == 0 && r.error_mva <= 1e-9
                }
                AlternativeOutcome::Failed(_) => false,
            };
            order.push(*alt);
            outcomes.insert(*alt, outcome);
            if perfect && self.config.stop_on_zero_error {
                break;
            }
        }

        let best = Self::select_best(&order, &outcomes)?;
        Ok(InterpretationResult { outcomes, order, best })
    }

    /// Picks the winning alternative. Failed evaluations are recorded in the
    /// outcome map but can never win; with no validated alternative at all
    /// there is nothing to trust and the whole interpretation is an error.
    fn select_best(
        order: &[MappingAlternative],
        outcomes: &HashMap<MappingAlternative, AlternativeOutcome>,
    ) -> Result<MappingAlternative, InterpretError> {
        order
            .iter()
            .enumerate()
            .filter_map(|(pos, alt)| match &outcomes[alt] {
                AlternativeOutcome::Validated(r) => {
                    Some(((r.failed_count(), OrderedFloat(r.error_mva), pos), *alt))
                }
                AlternativeOutcome::Failed(_) => None,
            })
            .min_by_key(|(key, _)| *key)
            .map(|(_, alt)| alt)
            .ok_or(InterpretError::AllAlternativesFailed)
    }
}
