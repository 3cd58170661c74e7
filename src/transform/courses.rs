// Courses, campuses and admission-level facts

use super::{StepContext, StepOutcome};
use crate::error::Result;
use crate::query::{Expr, Filter, Scope, Upsert};

const COURSES_OF_STUDY: &str = "stg_courses_of_study";
const COURSES: &str = "stg_hep_courses";
const COURSES_ON_CAMPUSES: &str = "stg_hep_courses_on_campuses";
const FIELDS_OF_EDUCATION: &str = "stg_course_fields_of_education";
const ADMISSIONS: &str = "stg_hep_course_admissions";
const PRIOR_CREDITS: &str = "stg_hep_course_prior_credits";
const SPECIALISATIONS: &str = "stg_course_specialisations";

pub fn upsert_course_of_study(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(COURSES_OF_STUDY) else {
        return Ok(StepOutcome::skipped(COURSES_OF_STUDY));
    };

    let rows = Upsert::into_table(
        "dim_course_of_study",
        "course_of_study_res_key",
        stg.col("UID3_CoursesOfStudyResKey")?,
    )
    .from(stg.name())
    .distinct()
    .set("provider_res_key", stg.col("UID1_ProvidersResKey")?)
    .set("course_of_study_code", stg.col("E533_CourseOfStudyCode")?)
    .set("course_of_study_name", stg.opt("E394_CourseOfStudyName"))
    .set("course_of_study_type", stg.opt("E310_CourseOfStudyType"))
    .set("course_of_study_load", stg.opt("E350_CourseOfStudyLoad"))
    .set("combined_course_indicator", stg.opt("E455_CombinedCourseOfStudyIndicator"))
    .execute(ctx.conn, ctx.extraction_ts)?;

    Ok(StepOutcome::Applied { rows })
}

/// Older vintages carry no CRICOS code; those courses get a null one
pub fn upsert_course(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(COURSES) else {
        return Ok(StepOutcome::skipped(COURSES));
    };

    let rows = Upsert::into_table("dim_course", "course_res_key", stg.col("UID5_CoursesResKey")?)
        .from(stg.name())
        .distinct()
        .set("provider_res_key", stg.col("UID1_ProvidersResKey")?)
        .set("course_of_study_res_key", stg.opt("UID3_CoursesOfStudyResKey"))
        .set("course_code", stg.col("E307_CourseCode")?)
        .set("course_name", stg.opt("E308_CourseName"))
        .set("standard_course_duration", stg.opt("E596_StandardCourseDuration"))
        .set("cricos_code", stg.opt("E597_CRICOSCode"))
        .set("effective_from_date", stg.opt("E609_EffectiveFromDate"))
        .set("effective_to_date", stg.opt("E610_EffectiveToDate"))
        .execute(ctx.conn, ctx.extraction_ts)?;

    Ok(StepOutcome::Applied { rows })
}

/// Campus dimension, course-campus bridge, then a campus rollup over the bridge
///
/// The first pass registers every campus seen in this extract. The bridge only
/// admits rows whose course is already in `dim_course`. The rollup recomputes
/// each campus from every bridge row ever loaded, so the effective-from date is
/// the earliest known and the effective-to date the latest known.
pub fn upsert_course_campus(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(COURSES_ON_CAMPUSES) else {
        return Ok(StepOutcome::skipped(COURSES_ON_CAMPUSES));
    };

    let campus_key = stg.col("UID2_CampusesResKey")?;
    let provider_key = stg.col("UID1_ProvidersResKey")?;
    let course_key = stg.col("UID5_CoursesResKey")?;
    let suburb = stg.opt("E525_CampusSuburb");
    let country = stg.opt("E644_CampusCountryCode");
    let postcode = stg.opt("E559_CampusPostcode");
    let campus_from = stg.opt("Campuses_E609_EffectiveFromDate");
    let campus_to = stg.opt("Campuses_E610_EffectiveToDate");

    let mut rows = Upsert::into_table("dim_campus", "campus_res_key", campus_key.clone())
        .from(stg.name())
        .set("provider_res_key", provider_key.clone())
        .set("campus_suburb", suburb.clone().min())
        .set("campus_country_code", country.clone().min())
        .set("campus_postcode", postcode.clone().min())
        .set("first_effective_from_date", campus_from.clone().known().min())
        .set("last_effective_to_date", campus_to.clone().known().max())
        .group_by(campus_key.clone())
        .group_by(provider_key.clone())
        .execute(ctx.conn, ctx.extraction_ts)?;

    rows += Upsert::into_table(
        "bridge_course_campus",
        "course_campus_res_key",
        stg.col("UID4_CoursesOnCampusResKey")?,
    )
    .from(stg.name())
    .set("provider_res_key", provider_key)
    .set("course_res_key", course_key.clone())
    .set("campus_res_key", campus_key)
    .set("campus_suburb", suburb)
    .set("campus_country_code", country)
    .set("campus_postcode", postcode)
    .set("campus_effective_from", campus_from)
    .set("campus_effective_to", campus_to)
    .set("course_effective_from", stg.opt("E609_EffectiveFromDate"))
    .set("course_effective_to", stg.opt("E610_EffectiveToDate"))
    .stamped()
    .filter(Filter::Present(course_key.clone()))
    .filter(Filter::ExistsIn {
        table: "dim_course",
        column: "course_res_key",
        value: course_key,
    })
    .execute(ctx.conn, ctx.extraction_ts)?;

    rows += campus_rollup().execute(ctx.conn, ctx.extraction_ts)?;

    Ok(StepOutcome::Applied { rows })
}

fn campus_rollup() -> Upsert {
    let campus_key = Expr::column("campus_res_key");
    let provider_key = Expr::column("provider_res_key");
    Upsert::into_table("dim_campus", "campus_res_key", campus_key.clone())
        .from("bridge_course_campus")
        .scope(Scope::All)
        .set("provider_res_key", provider_key.clone())
        .set("campus_suburb", Expr::column("campus_suburb").min())
        .set("campus_country_code", Expr::column("campus_country_code").min())
        .set("campus_postcode", Expr::column("campus_postcode").min())
        .set("first_effective_from_date", Expr::column("campus_effective_from").known().min())
        .set("last_effective_to_date", Expr::column("campus_effective_to").known().max())
        .group_by(campus_key)
        .group_by(provider_key)
}

pub fn upsert_course_field_of_education(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(FIELDS_OF_EDUCATION) else {
        return Ok(StepOutcome::skipped(FIELDS_OF_EDUCATION));
    };

    let rows = Upsert::into_table(
        "bridge_course_field_of_education",
        "course_field_res_key",
        stg.col("UID48_CourseFieldsOfEducationResKey")?,
    )
    .from(stg.name())
    .set("provider_res_key", stg.col("UID1_ProvidersResKey")?)
    .set("course_of_study_res_key", stg.opt("UID3_CoursesOfStudyResKey"))
    .set("course_res_key", stg.col("UID5_CoursesResKey")?)
    .set("course_code", stg.opt("E307_CourseCode"))
    .set("course_of_study_name", stg.opt("E394_CourseOfStudyName"))
    .set("field_of_education_code", stg.col("E461_FieldOfEducationCode")?)
    .set("field_of_education_supp_code", stg.opt("E462_FieldOfEducationSupplementaryCode"))
    .set("effective_from_date", stg.opt("E609_EffectiveFromDate"))
    .set("effective_to_date", stg.opt("E610_EffectiveToDate"))
    .stamped()
    .execute(ctx.conn, ctx.extraction_ts)?;

    Ok(StepOutcome::Applied { rows })
}

/// Mode of attendance, ATAR and selection rank only exist in newer vintages
pub fn upsert_course_admission(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(ADMISSIONS) else {
        return Ok(StepOutcome::skipped(ADMISSIONS));
    };

    let rows = Upsert::into_table(
        "fact_course_admission",
        "course_admission_res_key",
        stg.col("UID15_CourseAdmissionsResKey")?,
    )
    .from(stg.name())
    .set("provider_res_key", stg.col("UID1_ProvidersResKey")?)
    .set("student_res_key", stg.col("UID8_StudentsResKey")?)
    .set("course_res_key", stg.col("UID5_CoursesResKey")?)
    .set("student_identifier", stg.opt("E313_StudentIdentificationCode"))
    .set("course_code", stg.opt("E307_CourseCode"))
    .set("course_name", stg.opt("E308_CourseName"))
    .set("course_of_study_code", stg.opt("E533_CourseOfStudyCode"))
    .set("course_of_study_type", stg.opt("E310_CourseOfStudyType"))
    .set("course_commencement_date", stg.opt("E534_CourseOfStudyCommencementDate"))
    .set("attendance_type_code", stg.opt("E330_AttendanceTypeCode"))
    .set("mode_of_attendance_code", stg.opt("E329_ModeOfAttendanceCode"))
    .set("course_outcome_code", stg.opt("E599_CourseOutcomeCode"))
    .set("course_outcome_date", stg.opt("E592_CourseOutcomeDate"))
    .set("chessn", stg.opt("E488_CHESSN"))
    .set("hdr_thesis_submission_date", stg.opt("E591_HDRThesisSubmissionDate"))
    .set("atar", stg.opt_nullif("E632_ATAR"))
    .set("selection_rank", stg.opt_nullif("E605_SelectionRank"))
    .set("highest_attainment_code", stg.opt("E620_HighestAttainmentCode"))
    .set("hdr_primary_for_code", stg.opt("E594_HDRPrimaryFieldOfResearchCode"))
    .set("hdr_secondary_for_code", stg.opt("E595_HDRSecondaryFieldOfResearchCode"))
    .stamped()
    .execute(ctx.conn, ctx.extraction_ts)?;

    Ok(StepOutcome::Applied { rows })
}

pub fn upsert_course_prior_credit(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(PRIOR_CREDITS) else {
        return Ok(StepOutcome::skipped(PRIOR_CREDITS));
    };

    let rows = Upsert::into_table(
        "fact_course_prior_credit",
        "course_prior_credit_res_key",
        stg.col("UID32_CoursePriorCreditsResKey")?,
    )
    .from(stg.name())
    .set("provider_res_key", stg.col("UID1_ProvidersResKey")?)
    .set("course_admission_res_key", stg.col("UID15_CourseAdmissionsResKey")?)
    .set("student_identifier", stg.opt("E313_StudentIdentificationCode"))
    .set("course_code", stg.opt("E307_CourseCode"))
    .set("course_commencement_date", stg.opt("E534_CourseOfStudyCommencementDate"))
    .set("credit_used_value", stg.opt_nullif("E560_CreditUsedValue"))
    .set("credit_basis", stg.opt("E561_CreditBasis"))
    .set("credit_provider_code", stg.opt("E566_CreditProviderCode"))
    .stamped()
    .execute(ctx.conn, ctx.extraction_ts)?;

    Ok(StepOutcome::Applied { rows })
}

pub fn upsert_course_specialisation(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(SPECIALISATIONS) else {
        return Ok(StepOutcome::skipped(SPECIALISATIONS));
    };

    let rows = Upsert::into_table(
        "fact_course_specialisation",
        "course_specialisation_res_key",
        stg.col("UID33_CourseSpecialisationsResKey")?,
    )
    .from(stg.name())
    .set("provider_res_key", stg.col("UID1_ProvidersResKey")?)
    .set("course_admission_res_key", stg.col("UID15_CourseAdmissionsResKey")?)
    .set("student_res_key", stg.opt("UID8_StudentsResKey"))
    .set("student_identifier", stg.opt("E313_StudentIdentificationCode"))
    .set("course_code", stg.opt("E307_CourseCode"))
    .set("course_commencement_date", stg.opt("E534_CourseOfStudyCommencementDate"))
    .set("specialisation_code", stg.col("E463_SpecialisationCode")?)
    .stamped()
    .execute(ctx.conn, ctx.extraction_ts)?;

    Ok(StepOutcome::Applied { rows })
}
