//! Value-unit agent
//!
//! Computes a geographically adjusted value-unit total per procedure:
//! locality crosswalk, per-contractor adjustment factors, base values,
//! modifier adjustments, and the conversion-factor payment.

use async_trait::async_trait;
use tracing::debug;

use medflow_core::stage;
use medflow_core::{
    Agent, AgentContext, AgentData, AgentResult, ErrorKind, Evidence, EvidenceContent, LogLevel,
    MedflowResult, paths, ProcessingError, RvuLine, RvuResult, Severity, SERVICE_REFERENCE_STORE,
};
use medflow_store::{GpciRecord, LocalityCrosswalk, RvuRecord};

/// Fallback locality when demographics carry no usable state
const DEFAULT_STATE: &str = "AL";
const DEFAULT_CONTRACTOR: &str = "10112";

/// Totals above this raise `HIGH_RVU_VALUE`
const HIGH_RVU_THRESHOLD: f64 = 20.0;

/// The value-unit stage producer
pub struct ValueUnitAgent {
    conversion_factor: f64,
}

impl Default for ValueUnitAgent {
    fn default() -> Self {
        Self {
            conversion_factor: 1.0,
        }
    }
}

impl ValueUnitAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversion_factor(mut self, factor: f64) -> Self {
        self.conversion_factor = factor;
        self
    }

    /// Resolve the contractor from demographics.state via the crosswalk,
    /// defaulting when the state or the crosswalk is unavailable.
    async fn resolve_contractor(
        ctx: &AgentContext,
        errors: &mut Vec<ProcessingError>,
    ) -> MedflowResult<(String, String)> {
        let store = ctx.services.store()?;
        let state = ctx
            .state
            .demographics
            .state
            .clone()
            .unwrap_or_else(|| DEFAULT_STATE.to_string());

        if store.file_exists(paths::LOCALITY_CROSSWALK).await? {
            let bytes = store.get_file_content(paths::LOCALITY_CROSSWALK).await?;
            let crosswalk = LocalityCrosswalk::parse(paths::LOCALITY_CROSSWALK, &bytes)?;
            if let Some(entry) = crosswalk.lookup(&state) {
                return Ok((state, entry.contractor.clone()));
            }
            ctx.logger.log(
                LogLevel::Info,
                stage::VALUE_UNITS,
                &format!("state {} not in crosswalk, using default contractor", state),
            );
        } else {
            errors.push(
                ProcessingError::new(
                    stage::VALUE_UNITS,
                    "locality crosswalk unavailable, using default contractor",
                    Severity::Low,
                )
                .with_kind(ErrorKind::NotFound),
            );
        }

        Ok((state, DEFAULT_CONTRACTOR.to_string()))
    }

    async fn load_factors(
        ctx: &AgentContext,
        contractor: &str,
        errors: &mut Vec<ProcessingError>,
    ) -> MedflowResult<GpciRecord> {
        let store = ctx.services.store()?;
        let path = paths::gpci(contractor);

        if store.file_exists(&path).await? {
            let bytes = store.get_file_content(&path).await?;
            return GpciRecord::parse(&path, &bytes);
        }

        errors.push(
            ProcessingError::new(
                stage::VALUE_UNITS,
                format!("no adjustment factors for contractor {}, using 1.0", contractor),
                Severity::Low,
            )
            .with_kind(ErrorKind::NotFound),
        );
        Ok(GpciRecord {
            work: 1.0,
            practice_expense: 1.0,
            malpractice: 1.0,
        })
    }

    /// Modifier codes recorded against one procedure in the final list
    fn modifiers_for<'a>(ctx: &'a AgentContext, code: &str) -> Vec<&'a str> {
        ctx.state
            .final_modifiers
            .iter()
            .filter(|m| m.procedure_code == code)
            .filter_map(|m| m.code.as_deref())
            .collect()
    }
}

#[async_trait]
impl Agent for ValueUnitAgent {
    fn name(&self) -> &str {
        stage::VALUE_UNITS
    }

    fn description(&self) -> &str {
        "Computes geographically adjusted value-unit totals per procedure"
    }

    fn required_services(&self) -> &[&str] {
        &[SERVICE_REFERENCE_STORE]
    }

    async fn execute(&self, ctx: &AgentContext) -> MedflowResult<AgentResult> {
        let store = ctx.services.store()?;
        let mut errors = Vec::new();

        let (state, contractor) = Self::resolve_contractor(ctx, &mut errors).await?;
        let factors = Self::load_factors(ctx, &contractor, &mut errors).await?;

        let mut lines = Vec::new();
        for procedure in &ctx.state.procedures {
            ctx.check_cancelled()?;
            let path = paths::rvu(&procedure.code);

            let record = if store.file_exists(&path).await? {
                match RvuRecord::parse(&path, &store.get_file_content(&path).await?) {
                    Ok(record) => Some(record),
                    Err(err) => {
                        errors.push(
                            ProcessingError::new(
                                stage::VALUE_UNITS,
                                format!("unusable value-unit record for {}: {}", procedure.code, err),
                                Severity::Medium,
                            )
                            .with_kind(ErrorKind::Validation),
                        );
                        None
                    }
                }
            } else {
                None
            };

            let Some(record) = record else {
                // Missing base values yield a zero line with a flag, not
                // a stage failure.
                errors.push(
                    ProcessingError::new(
                        stage::VALUE_UNITS,
                        format!("no value-unit record for {}", procedure.code),
                        Severity::Low,
                    )
                    .with_code("HCPCS_NOT_FOUND")
                    .with_kind(ErrorKind::NotFound),
                );
                lines.push(RvuLine {
                    code: procedure.code.clone(),
                    work: 0.0,
                    practice_expense: 0.0,
                    malpractice: 0.0,
                    total: 0.0,
                    payment: 0.0,
                    flags: vec!["HCPCS_NOT_FOUND".to_string()],
                });
                continue;
            };

            let work = record.work * factors.work;
            let practice_expense = record.practice_expense * factors.practice_expense;
            let malpractice = record.malpractice * factors.malpractice;
            let mut total = work + practice_expense + malpractice;
            let mut flags = Vec::new();

            for modifier in Self::modifiers_for(ctx, &procedure.code) {
                match modifier {
                    "50" => total *= 1.5,
                    "63" => total *= 1.25,
                    "22" => flags.push("MANUAL_REVIEW".to_string()),
                    _ => {}
                }
            }

            if total > HIGH_RVU_THRESHOLD {
                flags.push("HIGH_RVU_VALUE".to_string());
            }

            debug!(code = %procedure.code, total, "value units computed");
            lines.push(RvuLine {
                code: procedure.code.clone(),
                work,
                practice_expense,
                malpractice,
                total,
                payment: total * self.conversion_factor,
                flags,
            });
        }

        let result = RvuResult {
            contractor,
            locality_state: state,
            conversion_factor: self.conversion_factor,
            lines,
        };

        let mut agent_result = AgentResult::success(AgentData::Rvu(result.clone()));
        agent_result.evidence.push(
            Evidence::new(
                stage::VALUE_UNITS,
                format!(
                    "computed {:.2} total value units across {} procedures",
                    result.total(),
                    result.lines.len()
                ),
                1.0,
            )
            .with_content(EvidenceContent::Rvu(result)),
        );
        agent_result.errors = errors;
        Ok(agent_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_conversion_factor() {
        let agent = ValueUnitAgent::new();
        assert_eq!(agent.conversion_factor, 1.0);

        let custom = ValueUnitAgent::new().with_conversion_factor(32.74);
        assert_eq!(custom.conversion_factor, 32.74);
    }
}
