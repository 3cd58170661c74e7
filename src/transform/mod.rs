// Transformation Pipeline
// Staging relations → warehouse dimensions, bridges and facts
//
// Steps run in a fixed, hand-ordered sequence. Referential correctness is
// carried by that order: anything consumed as a foreign key (providers,
// students, courses, course-campus bridges, admissions) is upserted by an
// earlier step of the same run.

pub mod courses;
pub mod enrolments;
pub mod finance;
pub mod people;

use crate::config::CommitMode;
use crate::error::{IngestError, Result};
use crate::snapshot::{SchemaSnapshot, StagingView};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

// ============================================================================
// STEP TYPES
// ============================================================================

/// What a step sees while it runs
pub struct StepContext<'a> {
    pub conn: &'a Connection,
    pub extraction_ts: &'a str,
    pub snapshot: &'a SchemaSnapshot,
}

impl<'a> StepContext<'a> {
    /// Staging relation for this run, if the extract contained it
    pub fn staging(&self, relation: &str) -> Option<StagingView<'a>> {
        self.snapshot.view(relation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Statements ran; `rows` counts rows inserted or updated
    Applied { rows: usize },
    /// Required staging input absent from this extract
    Skipped { missing: String },
}

impl StepOutcome {
    pub fn skipped(relation: &str) -> Self {
        StepOutcome::Skipped {
            missing: relation.to_string(),
        }
    }

    pub fn rows(&self) -> usize {
        match self {
            StepOutcome::Applied { rows } => *rows,
            StepOutcome::Skipped { .. } => 0,
        }
    }
}

pub type StepFn = fn(&StepContext<'_>) -> Result<StepOutcome>;

/// One named transform, writing one warehouse relation
#[derive(Clone, Copy)]
pub struct TransformStep {
    pub name: &'static str,
    pub target: &'static str,
    pub run: StepFn,
}

impl std::fmt::Debug for TransformStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformStep")
            .field("name", &self.name)
            .field("target", &self.target)
            .finish()
    }
}

/// The full ordered sequence
pub const PIPELINE: &[TransformStep] = &[
    TransformStep { name: "provider", target: "dim_provider", run: people::upsert_provider },
    TransformStep { name: "student", target: "dim_student", run: people::upsert_student },
    TransformStep { name: "student_contact", target: "bridge_student_contact", run: people::upsert_student_contact },
    TransformStep { name: "student_citizenship", target: "bridge_student_citizenship", run: people::upsert_student_citizenship },
    TransformStep { name: "student_disability", target: "bridge_student_disability", run: people::upsert_student_disability },
    TransformStep { name: "course_of_study", target: "dim_course_of_study", run: courses::upsert_course_of_study },
    TransformStep { name: "course", target: "dim_course", run: courses::upsert_course },
    TransformStep { name: "course_campus", target: "bridge_course_campus", run: courses::upsert_course_campus },
    TransformStep { name: "course_field_of_education", target: "bridge_course_field_of_education", run: courses::upsert_course_field_of_education },
    TransformStep { name: "course_admission", target: "fact_course_admission", run: courses::upsert_course_admission },
    TransformStep { name: "course_prior_credit", target: "fact_course_prior_credit", run: courses::upsert_course_prior_credit },
    TransformStep { name: "course_specialisation", target: "fact_course_specialisation", run: courses::upsert_course_specialisation },
    TransformStep { name: "unit_enrolment", target: "fact_unit_enrolment", run: enrolments::upsert_unit_enrolment },
    TransformStep { name: "unit_enrolment_aou", target: "fact_unit_enrolment_aou", run: enrolments::upsert_unit_enrolment_aou },
    TransformStep { name: "sahelp", target: "fact_student_loan", run: finance::upsert_sahelp },
    TransformStep { name: "oshelp", target: "fact_student_loan", run: finance::upsert_oshelp },
    TransformStep { name: "scholarships", target: "fact_scholarship", run: finance::upsert_scholarships },
    TransformStep { name: "course_fees", target: "fact_course_fee", run: finance::upsert_course_fees },
    TransformStep { name: "aggregated_awards", target: "fact_aggregated_award", run: finance::upsert_aggregated_awards },
];

// ============================================================================
// RUNNER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub target: String,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub steps: Vec<StepReport>,
}

impl PipelineReport {
    pub fn applied(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Applied { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.steps.len() - self.applied()
    }
}

/// Run the full ordered sequence against one staged snapshot
pub fn run_pipeline(
    conn: &Connection,
    extraction_ts: &str,
    snapshot: &SchemaSnapshot,
    mode: CommitMode,
) -> Result<PipelineReport> {
    run_steps(conn, PIPELINE, extraction_ts, snapshot, mode)
}

/// Run `steps` in order; the first failure aborts everything after it
///
/// `PerStep` commits each step on success, so earlier steps stand when a
/// later one fails. `Atomic` wraps the whole sequence in one transaction.
pub fn run_steps(
    conn: &Connection,
    steps: &[TransformStep],
    extraction_ts: &str,
    snapshot: &SchemaSnapshot,
    mode: CommitMode,
) -> Result<PipelineReport> {
    let mut report = PipelineReport::default();

    match mode {
        CommitMode::PerStep => {
            for step in steps {
                let tx = conn.unchecked_transaction()?;
                let outcome = run_one(&tx, step, extraction_ts, snapshot)?;
                tx.commit().map_err(|e| step_failure(step, e.into()))?;
                report.steps.push(step_report(step, outcome));
            }
        }
        CommitMode::Atomic => {
            let tx = conn.unchecked_transaction()?;
            for step in steps {
                // Returning early drops `tx`, rolling back every step
                let outcome = run_one(&tx, step, extraction_ts, snapshot)?;
                report.steps.push(step_report(step, outcome));
            }
            tx.commit()?;
        }
    }

    info!(
        extraction_ts,
        applied = report.applied(),
        skipped = report.skipped(),
        "transform pipeline complete"
    );
    Ok(report)
}

fn run_one(
    conn: &Connection,
    step: &TransformStep,
    extraction_ts: &str,
    snapshot: &SchemaSnapshot,
) -> Result<StepOutcome> {
    let ctx = StepContext {
        conn,
        extraction_ts,
        snapshot,
    };
    let started = Instant::now();

    match (step.run)(&ctx) {
        Ok(outcome) => {
            match &outcome {
                StepOutcome::Applied { rows } => info!(
                    step = step.name,
                    target = step.target,
                    rows,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "step applied"
                ),
                StepOutcome::Skipped { missing } => {
                    debug!(step = step.name, missing = %missing, "step skipped")
                }
            }
            Ok(outcome)
        }
        Err(e) => {
            warn!(step = step.name, error = %e, "step failed, aborting remaining steps");
            Err(step_failure(step, e))
        }
    }
}

fn step_failure(step: &TransformStep, source: IngestError) -> IngestError {
    IngestError::TransformStepFailure {
        step: step.name,
        source: Box::new(source),
    }
}

fn step_report(step: &TransformStep, outcome: StepOutcome) -> StepReport {
    StepReport {
        name: step.name.to_string(),
        target: step.target.to_string(),
        outcome,
    }
}
