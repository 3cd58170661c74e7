// Unit enrolments and their AOU splits
//
// Both facts read the same combined units/AOUs staging relation. One source
// row carries a unit enrolment together with one of its AOU rows, so the unit
// enrolment upsert collapses repeats by key.

use super::{StepContext, StepOutcome};
use crate::error::Result;
use crate::query::Upsert;

const UNITS_AOUS: &str = "stg_hep_units_aous";

pub fn upsert_unit_enrolment(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(UNITS_AOUS) else {
        return Ok(StepOutcome::skipped(UNITS_AOUS));
    };

    let rows = Upsert::into_table(
        "fact_unit_enrolment",
        "unit_enrolment_res_key",
        stg.col("UID16_UnitEnrolmentsResKey")?,
    )
    .from(stg.name())
    .distinct()
    .set("provider_code", stg.opt("E306_ProviderCode"))
    .set("student_res_key", stg.col("UID8_StudentsResKey")?)
    .set("student_identifier", stg.opt("E313_StudentIdentificationCode"))
    .set("chessn", stg.opt("E488_CHESSN"))
    .set("course_admission_res_key", stg.col("UID15_CourseAdmissionsResKey")?)
    .set("course_of_study_code", stg.opt("E533_CourseOfStudyCode"))
    .set("course_of_study_type", stg.opt("E310_CourseOfStudyType"))
    .set("course_res_key", stg.opt("UID5_CoursesResKey"))
    .set("course_code", stg.opt("E307_CourseCode"))
    .set("course_name", stg.opt("E308_CourseName"))
    .set("course_commencement_date", stg.opt("E534_CourseOfStudyCommDate"))
    .set("unit_of_study_code", stg.col("E354_UnitOfStudyCode")?)
    .set("census_date", stg.opt("E489_UnitOfStudyCensusDate"))
    .set("work_experience_code", stg.opt("E337_WorkExperienceInIndustryCode"))
    .set("summer_winter_school_code", stg.opt("E551_SummerWinterSchoolCode"))
    .set("discipline_code", stg.opt("E464_DisciplineCode"))
    .set("unit_status_code", stg.opt("E355_UnitOfStudyStatusCode"))
    .set("mode_of_attendance_code", stg.opt("E329_ModeOfAttendanceCode"))
    .set("delivery_location_postcode", stg.opt("E477_DeliveryLocationPostcode"))
    .set("delivery_location_country_code", stg.opt("E660_DeliveryLocationCountryCode"))
    .set("student_status_code", stg.opt("E490_StudentStatusCode"))
    .set("max_student_contribution_code", stg.opt("E392_MaximumStudentContributionCode"))
    .set("year_long_indicator", stg.opt("E622_UnitOfStudyYearLongIndicator"))
    .set("unit_commencement_date", stg.opt("E600_UnitOfStudyCommencementDate"))
    .set("unit_outcome_date", stg.opt("E601_UnitOfStudyOutcomeDate"))
    .set("remission_reason_code", stg.opt("E446_RemissionReasonCode"))
    .set("loan_status", stg.opt("A130_LoanStatus"))
    .set("student_loan_res_key", stg.opt("UID21_StudentLoansResKey"))
    .set("adjusted_loan_amount", stg.opt_nullif("E662_AdjustedLoanAmount"))
    .set("adjusted_loan_fee", stg.opt_nullif("E663_AdjustedLoanFee"))
    .set("eftsl", stg.opt_nullif("UE_E339_EFTSL"))
    .set("amount_charged", stg.opt_nullif("UE_E384_AmountCharged"))
    .set("amount_paid_upfront", stg.opt_nullif("UE_E381_AmountPaidUpfront"))
    .set("help_loan_amount", stg.opt_nullif("UE_E558_HELPLoanAmount"))
    .set("loan_fee", stg.opt_nullif("UE_E529_LoanFee"))
    .set("is_deleted", stg.opt("UE_A111_IsDeleted"))
    .stamped()
    .set("reporting_year", stg.provenance("reporting_year"))
    .execute(ctx.conn, ctx.extraction_ts)?;

    Ok(StepOutcome::Applied { rows })
}

pub fn upsert_unit_enrolment_aou(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(UNITS_AOUS) else {
        return Ok(StepOutcome::skipped(UNITS_AOUS));
    };

    let rows = Upsert::into_table(
        "fact_unit_enrolment_aou",
        "unit_enrolment_aou_res_key",
        stg.col("UID19_UnitEnrolmentAOUsResKey")?,
    )
    .from(stg.name())
    .set("unit_enrolment_res_key", stg.col("UID16_UnitEnrolmentsResKey")?)
    .set("aou_code", stg.col("E333_AOUCode")?)
    .set("eftsl", stg.opt_nullif("AOU_E339_EFTSL"))
    .set("amount_charged", stg.opt_nullif("AOU_E384_AmountCharged"))
    .set("amount_paid_upfront", stg.opt_nullif("AOU_E381_AmountPaidUpfront"))
    .set("help_loan_amount", stg.opt_nullif("AOU_E558_HELPLoanAmount"))
    .set("loan_fee", stg.opt_nullif("AOU_E529_LoanFee"))
    .set("is_deleted", stg.opt("AOU_IsDeleted"))
    .stamped()
    .set("reporting_year", stg.provenance("reporting_year"))
    .execute(ctx.conn, ctx.extraction_ts)?;

    Ok(StepOutcome::Applied { rows })
}
