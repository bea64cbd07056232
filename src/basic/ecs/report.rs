use std::fmt;
use std::io::Write;

use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use super::interpret::{AlternativeOutcome, InterpretationResult};
use super::network::InterpretError;
use super::validation::ValidationReport;

/// A wrapper around a float that limits the number of decimal places when
/// printed.
#[derive(Clone, Copy, PartialEq, PartialOrd)]
pub(crate) struct FloatWrapper {
    pub(crate) value: f64,
    pub(crate) precision: usize,
}

impl FloatWrapper {
    pub fn new(value: f64, precision: usize) -> Self {
        FloatWrapper { value, precision }
    }
}

impl Default for FloatWrapper {
    fn default() -> Self {
        Self { value: Default::default(), precision: 3 }
    }
}

impl fmt::Display for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1$}", self.value, self.precision)
    }
}

impl fmt::Debug for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1$}", self.value, self.precision)
    }
}

/// Table row for one validated branch end.
#[derive(Debug, Tabled)]
pub(crate) struct FlowResTable {
    pub(crate) end: String,
    pub(crate) status: String,
    pub(crate) p_mw: FloatWrapper,
    pub(crate) q_mvar: FloatWrapper,
    pub(crate) p_rec_mw: FloatWrapper,
    pub(crate) q_rec_mvar: FloatWrapper,
}

/// Table row for one bus balance.
#[derive(Debug, Tabled)]
pub(crate) struct BalanceResTable {
    pub(crate) bus: i64,
    pub(crate) p_mw: FloatWrapper,
    pub(crate) q_mvar: FloatWrapper,
    pub(crate) known: bool,
    pub(crate) within_tol: bool,
}

/// Table row for one mapping alternative of an interpretation run.
#[derive(Debug, Tabled)]
pub(crate) struct SummaryResTable {
    pub(crate) alternative: String,
    pub(crate) outcome: String,
    pub(crate) failed: usize,
    pub(crate) ok: usize,
    pub(crate) error_mva: FloatWrapper,
}

#[derive(Serialize)]
struct FlowCsvRow<'a> {
    end: &'a str,
    status: String,
    calculated: bool,
    p_mw: f64,
    q_mvar: f64,
    p_recorded_mw: f64,
    q_recorded_mvar: f64,
}

/// Tabular views of a validation report.
pub trait ReportTables {
    fn flow_table(&self) -> Table;
    fn balance_table(&self) -> Table;
    fn print_all(&self);
    fn write_flows_csv<W: Write>(&self, writer: W) -> Result<(), InterpretError>;
}

impl ReportTables for ValidationReport {
    fn flow_table(&self) -> Table {
        let rows: Vec<FlowResTable> = self
            .flows
            .iter()
            .map(|(end, f)| FlowResTable {
                end: end.clone(),
                status: f.status.to_string(),
                p_mw: FloatWrapper::new(f.p_mw, 3),
                q_mvar: FloatWrapper::new(f.q_mvar, 3),
                p_rec_mw: FloatWrapper::new(f.p_recorded_mw, 3),
                q_rec_mvar: FloatWrapper::new(f.q_recorded_mvar, 3),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::markdown());
        table
    }

    fn balance_table(&self) -> Table {
        let rows: Vec<BalanceResTable> = self
            .balances
            .iter()
            .map(|(bus, b)| BalanceResTable {
                bus: *bus,
                p_mw: FloatWrapper::new(b.p_mw, 3),
                q_mvar: FloatWrapper::new(b.q_mvar, 3),
                known: b.known,
                within_tol: !b.known || b.mismatch_mva() <= self.balance_tol_mva,
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::markdown());
        table
    }

    fn print_all(&self) {
        println!("{}", self.flow_table());
        println!("{}", self.balance_table());
        println!(
            "flows: {} ok, {} failed, {} not calculated, {} missing record; balance error {:.3} MVA",
            self.ok_count(),
            self.failed_count(),
            self.not_calculated_count(),
            self.missing_record_count(),
            self.error_mva
        );
    }

    fn write_flows_csv<W: Write>(&self, writer: W) -> Result<(), InterpretError> {
        let mut wtr = csv::Writer::from_writer(writer);
        for (end, f) in &self.flows {
            wtr.serialize(FlowCsvRow {
                end,
                status: f.status.to_string(),
                calculated: f.calculated,
                p_mw: f.p_mw,
                q_mvar: f.q_mvar,
                p_recorded_mw: f.p_recorded_mw,
                q_recorded_mvar: f.q_recorded_mvar,
            })?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Per-alternative summary of an interpretation run.
pub trait SummaryTables {
    fn summary_table(&self) -> Table;
    fn print_summary(&self);
}

impl SummaryTables for InterpretationResult {
    fn summary_table(&self) -> Table {
        let rows: Vec<SummaryResTable> = self
            .order
            .iter()
            .map(|alt| {
                let marker = if *alt == self.best { " *" } else { "" };
                match &self.outcomes[alt] {
                    AlternativeOutcome::Validated(r) => SummaryResTable {
                        alternative: format!("{alt}{marker}"),
                        outcome: "validated".to_string(),
                        failed: r.failed_count(),
                        ok: r.ok_count(),
                        error_mva: FloatWrapper::new(r.error_mva, 3),
                    },
                    AlternativeOutcome::Failed(reason) => SummaryResTable {
                        alternative: format!("{alt}{marker}"),
                        outcome: reason.clone(),
                        failed: 0,
                        ok: 0,
                        error_mva: FloatWrapper::new(f64::NAN, 3),
                    },
                }
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::markdown());
        table
    }

    fn print_summary(&self) {
        println!("{}", self.summary_table());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::ecs::interpret::{Interpreter, MappingAlternative};
    use crate::basic::ecs::validation::{InterpretConfig, validate};
    use crate::testcases;

    #[test]
    fn csv_export_lists_every_end() {
        let model = testcases::node_model();
        let report = validate(&model, &MappingAlternative::default(), &InterpretConfig::default())
            .unwrap();
        let mut buf = Vec::new();
        report.write_flows_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        // header + one row per branch end
        assert_eq!(lines.len(), 1 + report.flow_count());
        assert!(lines[0].starts_with("end,status,calculated"));
        assert!(text.contains("L-01.1"));
    }

    #[test]
    fn summary_marks_the_best_alternative() {
        let model = testcases::node_model();
        let result = Interpreter::default().interpret(&model).unwrap();
        let rendered = result.summary_table().to_string();
        assert!(rendered.contains('*'));
    }
}
