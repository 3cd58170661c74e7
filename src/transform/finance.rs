// Loans, scholarships, course fees and aggregated awards

use super::{StepContext, StepOutcome};
use crate::error::Result;
use crate::query::{Expr, Upsert};

const SAHELP: &str = "stg_sahelp";
const OSHELP: &str = "stg_oshelp";
const COMMONWEALTH_SCHOLARSHIPS: &str = "stg_commonwealth_scholarships";
const RTP_SCHOLARSHIPS: &str = "stg_rtp_scholarships";
const RTP_STIPEND: &str = "stg_rtp_stipend";
const COURSE_FEES: &str = "stg_campus_course_fees_itsp";
const AGGREGATED_AWARDS: &str = "stg_aggregated_awards";

/// Loan type discriminators in `fact_student_loan`
pub const LOAN_SAHELP: &str = "SAHELP";
pub const LOAN_OSHELP: &str = "OSHELP";

/// Scholarship type discriminators in `fact_scholarship`
pub const SCHOLARSHIP_COMMONWEALTH: &str = "COMMONWEALTH";
pub const SCHOLARSHIP_RTP: &str = "RTP_SCHOLARSHIP";
pub const SCHOLARSHIP_RTP_STIPEND: &str = "RTP_STIPEND";

// ============================================================================
// STUDENT LOANS
// ============================================================================

pub fn upsert_sahelp(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(SAHELP) else {
        return Ok(StepOutcome::skipped(SAHELP));
    };

    let rows = Upsert::into_table("fact_student_loan", "student_loan_res_key", stg.col("UID21_StudentLoansResKey")?)
        .from(stg.name())
        .set("provider_res_key", stg.col("UID1_ProvidersResKey")?)
        .set("student_res_key", stg.col("UID8_StudentsResKey")?)
        .set("course_admission_res_key", Expr::Null)
        .set("loan_type", Expr::bind(LOAN_SAHELP))
        .set("loan_amount", stg.opt_nullif("E558_HELPLoanAmount"))
        .set("loan_fee", stg.opt_nullif("E529_LoanFee"))
        .set("status_code", stg.opt("A130_LoanStatus"))
        .stamped()
        .execute(ctx.conn, ctx.extraction_ts)?;

    Ok(StepOutcome::Applied { rows })
}

pub fn upsert_oshelp(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(OSHELP) else {
        return Ok(StepOutcome::skipped(OSHELP));
    };

    let rows = Upsert::into_table("fact_student_loan", "student_loan_res_key", stg.col("UID21_StudentLoansResKey")?)
        .from(stg.name())
        .set("provider_res_key", stg.col("UID1_ProvidersResKey")?)
        .set("student_res_key", stg.col("UID8_StudentsResKey")?)
        .set("course_admission_res_key", stg.opt("UID15_CourseAdmissionsResKey"))
        .set("loan_type", Expr::bind(LOAN_OSHELP))
        .set("loan_amount", stg.opt_nullif("E528_OSHELPPaymentAmount"))
        .set("loan_fee", stg.opt_nullif("E529_LoanFee"))
        .set("status_code", stg.opt("A130_LoanStatus"))
        .stamped()
        .execute(ctx.conn, ctx.extraction_ts)?;

    Ok(StepOutcome::Applied { rows })
}

// ============================================================================
// SCHOLARSHIPS
// ============================================================================

/// Up to three scholarship sources feed one fact; each is applied if staged
pub fn upsert_scholarships(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let mut applied = false;
    let mut rows = 0;

    if let Some(stg) = ctx.staging(COMMONWEALTH_SCHOLARSHIPS) {
        applied = true;
        rows += Upsert::into_table(
            "fact_scholarship",
            "scholarship_res_key",
            stg.col("UID12_StudentCommonwealthScholarshipsResKey")?,
        )
        .from(stg.name())
        .set("provider_res_key", stg.col("UID1_ProvidersResKey")?)
        .set("student_res_key", stg.col("UID8_StudentsResKey")?)
        .set("course_admission_res_key", Expr::Null)
        .set("student_identifier", stg.opt("E313_StudentIdentificationCode"))
        .set("scholarship_type", Expr::bind(SCHOLARSHIP_COMMONWEALTH))
        .set("reporting_year", stg.opt("E415_ReportingYear"))
        .set("reporting_period", stg.opt("E666_ReportingPeriod"))
        .set("amount", stg.opt_nullif("E598_CommonwealthScholarshipAmount"))
        .set("status_code", stg.opt("E526_CommonwealthScholarshipStatusCode"))
        .stamped()
        .execute(ctx.conn, ctx.extraction_ts)?;
    }

    if let Some(stg) = ctx.staging(RTP_SCHOLARSHIPS) {
        applied = true;
        rows += Upsert::into_table("fact_scholarship", "scholarship_res_key", stg.col("UID35_RTPScholarshipsResKey")?)
            .from(stg.name())
            .set("provider_res_key", stg.col("UID1_ProvidersResKey")?)
            .set("student_res_key", stg.col("UID8_StudentsResKey")?)
            .set("course_admission_res_key", stg.opt("UID15_CourseAdmissionsResKey"))
            .set("student_identifier", stg.opt("E313_StudentIdentificationCode"))
            .set("scholarship_type", Expr::bind(SCHOLARSHIP_RTP))
            .set("reporting_year", Expr::Null)
            .set("reporting_period", Expr::Null)
            .set("amount", Expr::Null)
            .set("status_code", stg.opt("E487_RTPScholarshipType"))
            .stamped()
            .execute(ctx.conn, ctx.extraction_ts)?;
    }

    if let Some(stg) = ctx.staging(RTP_STIPEND) {
        applied = true;
        rows += Upsert::into_table("fact_scholarship", "scholarship_res_key", stg.col("UID18_RTPStipendsResKey")?)
            .from(stg.name())
            .set("provider_res_key", stg.col("UID1_ProvidersResKey")?)
            .set("student_res_key", stg.opt("UID8_StudentsResKey"))
            .set("course_admission_res_key", stg.opt("UID15_CourseAdmissionsResKey"))
            .set("student_identifier", stg.opt("E313_StudentIdentificationCode"))
            .set("scholarship_type", Expr::bind(SCHOLARSHIP_RTP_STIPEND))
            .set("reporting_year", stg.opt("E415_ReportingYear"))
            .set("reporting_period", Expr::Null)
            .set("amount", stg.opt_nullif("E623_RTPStipendAmount"))
            .set("status_code", Expr::Null)
            .stamped()
            .execute(ctx.conn, ctx.extraction_ts)?;
    }

    if applied {
        Ok(StepOutcome::Applied { rows })
    } else {
        Ok(StepOutcome::Skipped {
            missing: [COMMONWEALTH_SCHOLARSHIPS, RTP_SCHOLARSHIPS, RTP_STIPEND].join(", "),
        })
    }
}

// ============================================================================
// FEES AND AWARDS
// ============================================================================

pub fn upsert_course_fees(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(COURSE_FEES) else {
        return Ok(StepOutcome::skipped(COURSE_FEES));
    };

    let rows = Upsert::into_table("fact_course_fee", "campus_course_fee_res_key", stg.col("UID31_CampusCourseFeesResKey")?)
        .from(stg.name())
        .set("provider_res_key", stg.col("UID1_ProvidersResKey")?)
        .set("course_campus_res_key", stg.col("UID4_CoursesOnCampusResKey")?)
        .set("course_res_key", stg.opt("UID5_CoursesResKey"))
        .set("course_code", stg.opt("E307_CourseCode"))
        .set("campus_suburb", stg.opt("E525_CampusSuburb"))
        .set("indicative_student_contribution_csp", stg.opt_nullif("E495_IndicativeStudentContributionCSP"))
        .set("indicative_tuition_fee_domestic_fp", stg.opt_nullif("E496_IndicativeTuitionFeeDomesticFP"))
        .set("effective_from_date", stg.opt("E609_EffectiveFromDate"))
        .set("campus_effective_from_date", stg.opt("Campuses_E609_EffectiveFromDate"))
        .stamped()
        .execute(ctx.conn, ctx.extraction_ts)?;

    Ok(StepOutcome::Applied { rows })
}

pub fn upsert_aggregated_awards(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(AGGREGATED_AWARDS) else {
        return Ok(StepOutcome::skipped(AGGREGATED_AWARDS));
    };

    let rows = Upsert::into_table(
        "fact_aggregated_award",
        "aggregated_award_res_key",
        stg.col("UID47_AggregateAwardsResKey")?,
    )
    .from(stg.name())
    .set("provider_res_key", stg.col("UID1_ProvidersResKey")?)
    .set("student_res_key", stg.col("UID8_StudentsResKey")?)
    .set("course_res_key", stg.opt("UID5_CoursesResKey"))
    .set("course_code", stg.opt("E307_CourseCode"))
    .set("course_commencement_date", stg.opt("E534_CourseOfStudyCommencementDate"))
    .set("course_outcome_code", stg.opt("E599_CourseOutcomeCode"))
    .set("course_outcome_date", stg.opt("E592_CourseOutcomeDate"))
    .set("hdr_thesis_submission_date", stg.opt("E591_HDRThesisSubmissionDate"))
    .set("attendance_type_code", stg.opt("E330_AttendanceTypeCode"))
    .set("mode_of_attendance_code", stg.opt("E329_ModeOfAttendanceCode"))
    .stamped()
    .execute(ctx.conn, ctx.extraction_ts)?;

    Ok(StepOutcome::Applied { rows })
}
