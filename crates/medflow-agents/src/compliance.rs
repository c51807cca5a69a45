//! Compliance agent
//!
//! Validates the procedure list against procedure-pair edits, unit
//! limits, global-period policy, and value-unit plausibility. Pure data
//! lookups against the reference store; no model calls.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use async_trait::async_trait;

use medflow_core::stage;
use medflow_core::{
    Agent, AgentContext, AgentData, AgentResult, ComplianceMetadata, ComplianceResult, Evidence,
    EvidenceContent, GlobalPeriodViolation, LogLevel, MedflowResult, MueViolation, paths,
    ProcedureCode, RvuViolation, PtpViolation, ViolationSeverity, SERVICE_REFERENCE_STORE,
};
use medflow_store::{PtpEditFile, RvuRecord};

use crate::codes::is_unlisted;

/// Where the service was rendered, derived from place of service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceSetting {
    Hospital,
    Practitioner,
}

impl ServiceSetting {
    /// Place-of-service codes 21, 22, and 23 are hospital settings
    pub fn from_place_of_service(pos: Option<&str>) -> Self {
        match pos {
            Some("21") | Some("22") | Some("23") => Self::Hospital,
            _ => Self::Practitioner,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hospital => "hospital",
            Self::Practitioner => "practitioner",
        }
    }
}

/// Global-period indicators that warrant an advisory
const ADVISORY_GLOBAL_PERIODS: &[&str] = &["010", "090"];

/// The compliance stage producer
#[derive(Default)]
pub struct ComplianceAgent;

impl ComplianceAgent {
    pub fn new() -> Self {
        Self
    }

    /// Load the edit table for a column-1 code, caching per execution.
    /// A missing table is recorded as `None` so the code is skipped with
    /// an info log and not re-fetched.
    async fn edit_table<'a>(
        ctx: &AgentContext,
        cache: &'a mut HashMap<String, Option<PtpEditFile>>,
        code: &str,
    ) -> MedflowResult<&'a Option<PtpEditFile>> {
        if !cache.contains_key(code) {
            let store = ctx.services.store()?;
            let path = paths::ptp(code);
            let entry = if store.file_exists(&path).await? {
                let bytes = store.get_file_content(&path).await?;
                Some(PtpEditFile::parse(&path, &bytes)?)
            } else {
                ctx.logger.log(
                    LogLevel::Info,
                    stage::COMPLIANCE,
                    &format!("no procedure-pair table for {}, skipping", code),
                );
                None
            };
            cache.insert(code.to_string(), entry);
        }
        Ok(cache.get(code).expect("just inserted"))
    }

    /// Check one orientation of a pair. Returns a violation when an
    /// active edit exists and no permitted bypass modifier is already
    /// present on either code.
    fn check_orientation(
        table: &PtpEditFile,
        column1: &ProcedureCode,
        column2: &ProcedureCode,
        date_of_service: chrono::NaiveDate,
    ) -> Option<PtpViolation> {
        let edit = table
            .active_against(&column2.code, date_of_service)
            .next()?;

        let bypass_present = edit.modifier_indicator.allowed_bypass_modifiers().iter().any(
            |modifier| {
                column1.applied_modifiers.iter().any(|m| m == modifier)
                    || column2.applied_modifiers.iter().any(|m| m == modifier)
            },
        );
        if bypass_present {
            return None;
        }

        let message = match edit.modifier_indicator {
            medflow_core::ModifierIndicator::NotAllowed => format!(
                "{} cannot be billed with {}; no bypass modifier is permitted",
                column2.code, column1.code
            ),
            _ => format!(
                "{} cannot be billed with {} unless a permitted bypass modifier is appended",
                column2.code, column1.code
            ),
        };

        Some(PtpViolation {
            column1: column1.code.clone(),
            column2: column2.code.clone(),
            modifier_indicator: edit.modifier_indicator,
            severity: ViolationSeverity::Error,
            message,
        })
    }

    /// Procedure-pair validation across every unordered pair. Both
    /// orientations are consulted, but a pair flagged in one orientation
    /// is not re-flagged in the reverse.
    async fn validate_pairs(
        ctx: &AgentContext,
        procedures: &[ProcedureCode],
    ) -> MedflowResult<Vec<PtpViolation>> {
        let date_of_service = ctx.state.case_meta.date_of_service;
        let mut cache: HashMap<String, Option<PtpEditFile>> = HashMap::new();
        let mut flagged: HashSet<(String, String)> = HashSet::new();
        let mut violations = Vec::new();

        for i in 0..procedures.len() {
            for j in (i + 1)..procedures.len() {
                ctx.check_cancelled()?;
                let (a, b) = (&procedures[i], &procedures[j]);

                let pair_key = |x: &ProcedureCode, y: &ProcedureCode| {
                    (x.code.clone(), y.code.clone())
                };
                if flagged.contains(&pair_key(a, b)) || flagged.contains(&pair_key(b, a)) {
                    continue;
                }

                let mut hit = None;
                if let Some(table) = Self::edit_table(ctx, &mut cache, &a.code).await? {
                    hit = Self::check_orientation(table, a, b, date_of_service);
                }
                if hit.is_none() {
                    if let Some(table) = Self::edit_table(ctx, &mut cache, &b.code).await? {
                        hit = Self::check_orientation(table, b, a, date_of_service);
                    }
                }

                if let Some(violation) = hit {
                    flagged.insert((violation.column1.clone(), violation.column2.clone()));
                    violations.push(violation);
                }
            }
        }

        Ok(violations)
    }

    fn validate_units(procedures: &[ProcedureCode]) -> Vec<MueViolation> {
        procedures
            .iter()
            .filter_map(|p| {
                let limit = p.unit_limit?;
                let adjudication = p.unit_limit_adjudication?;
                if p.units > limit {
                    Some(MueViolation {
                        code: p.code.clone(),
                        units: p.units,
                        limit,
                        adjudication,
                        severity: ViolationSeverity::Error,
                        message: format!(
                            "{} billed {} units against a limit of {} (MAI {})",
                            p.code,
                            p.units,
                            limit,
                            adjudication.as_u8()
                        ),
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    /// Global-period advisories. Prior-surgery history is unavailable
    /// here, so these are warnings only.
    fn validate_global_periods(procedures: &[ProcedureCode]) -> Vec<GlobalPeriodViolation> {
        procedures
            .iter()
            .filter_map(|p| {
                let period = p.global_period.as_deref()?;
                if ADVISORY_GLOBAL_PERIODS.contains(&period) {
                    Some(GlobalPeriodViolation {
                        code: p.code.clone(),
                        global_period: period.to_string(),
                        severity: ViolationSeverity::Warning,
                        message: format!(
                            "{} carries a {}-day global period; verify no related surgery in window",
                            p.code,
                            period.trim_start_matches('0')
                        ),
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    /// Value-unit plausibility: an unlisted code with zero or absent base
    /// values warrants review.
    async fn validate_rvu_plausibility(
        ctx: &AgentContext,
        procedures: &[ProcedureCode],
    ) -> MedflowResult<Vec<RvuViolation>> {
        let store = ctx.services.store()?;
        let mut violations = Vec::new();

        for procedure in procedures.iter().filter(|p| is_unlisted(&p.code)) {
            let path = paths::rvu(&procedure.code);
            let zero_or_absent = if store.file_exists(&path).await? {
                let bytes = store.get_file_content(&path).await?;
                match RvuRecord::parse(&path, &bytes) {
                    Ok(record) => {
                        record.work + record.practice_expense + record.malpractice == 0.0
                    }
                    Err(_) => true,
                }
            } else {
                true
            };

            if zero_or_absent {
                violations.push(RvuViolation {
                    code: procedure.code.clone(),
                    severity: ViolationSeverity::Warning,
                    message: format!(
                        "unlisted code {} has no value units on file; manual pricing required",
                        procedure.code
                    ),
                });
            }
        }

        Ok(violations)
    }
}

#[async_trait]
impl Agent for ComplianceAgent {
    fn name(&self) -> &str {
        stage::COMPLIANCE
    }

    fn description(&self) -> &str {
        "Validates procedures against pair edits, unit limits, and global periods"
    }

    fn required_services(&self) -> &[&str] {
        &[SERVICE_REFERENCE_STORE]
    }

    async fn execute(&self, ctx: &AgentContext) -> MedflowResult<AgentResult> {
        let start = Instant::now();
        let procedures = &ctx.state.procedures;
        let setting =
            ServiceSetting::from_place_of_service(ctx.state.case_meta.place_of_service.as_deref());

        let mut result = ComplianceResult {
            ptp_violations: Self::validate_pairs(ctx, procedures).await?,
            mue_violations: Self::validate_units(procedures),
            global_period_violations: Self::validate_global_periods(procedures),
            rvu_violations: Self::validate_rvu_plausibility(ctx, procedures).await?,
            metadata: ComplianceMetadata::default(),
        };
        result.metadata.duration_ms = start.elapsed().as_millis() as u64;

        let mut evidence: Vec<Evidence> = Vec::new();
        for violation in &result.ptp_violations {
            evidence.push(Evidence::new(stage::COMPLIANCE, &violation.message, 1.0));
        }
        for violation in &result.mue_violations {
            evidence.push(Evidence::new(stage::COMPLIANCE, &violation.message, 1.0));
        }
        for violation in &result.global_period_violations {
            evidence.push(Evidence::new(stage::COMPLIANCE, &violation.message, 1.0));
        }
        for violation in &result.rvu_violations {
            evidence.push(Evidence::new(stage::COMPLIANCE, &violation.message, 1.0));
        }
        evidence.push(
            Evidence::new(
                stage::COMPLIANCE,
                format!(
                    "compliance {} for {} setting with {} violations",
                    match result.status() {
                        medflow_core::ComplianceStatus::Pass => "PASS",
                        medflow_core::ComplianceStatus::Fail => "FAIL",
                    },
                    setting.as_str(),
                    result.total_violations()
                ),
                1.0,
            )
            .with_content(EvidenceContent::Compliance(result.clone())),
        );

        let mut agent_result = AgentResult::success(AgentData::Compliance(result));
        agent_result.evidence = evidence;
        Ok(agent_result)
    }
}
