// Providers, students and the student-level bridges

use super::{StepContext, StepOutcome};
use crate::error::Result;
use crate::keys::derived_key;
use crate::query::{values_upsert_sql, Filter, Select, Upsert};
use rusqlite::params_from_iter;

const STUDENTS: &str = "stg_hep_students";
const CONTACTS: &str = "stg_student_contacts_first_reported_address";
const CITIZENSHIPS: &str = "stg_hep_student_citizenships";
const DISABILITIES: &str = "stg_hep_student_disabilities";

pub fn upsert_provider(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(STUDENTS) else {
        return Ok(StepOutcome::skipped(STUDENTS));
    };

    let rows = Upsert::into_table("dim_provider", "provider_res_key", stg.col("UID1_ProvidersResKey")?)
        .from(stg.name())
        .distinct()
        .set("provider_code", stg.col("E306_ProviderCode")?)
        .set("provider_type", stg.opt("E781_ProviderType"))
        .execute(ctx.conn, ctx.extraction_ts)?;

    Ok(StepOutcome::Applied { rows })
}

pub fn upsert_student(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(STUDENTS) else {
        return Ok(StepOutcome::skipped(STUDENTS));
    };

    let rows = Upsert::into_table("dim_student", "student_res_key", stg.col("UID8_StudentsResKey")?)
        .from(stg.name())
        .set("provider_res_key", stg.col("UID1_ProvidersResKey")?)
        .set("student_identifier", stg.col("E313_StudentIdentificationCode")?)
        .set("chessn", stg.opt("E488_CHESSN"))
        .set("usi", stg.opt("E584_USI"))
        .set("usi_verification_status", stg.opt("A170_USIVerificationStatus"))
        .set("tfn_verification_status", stg.opt("A167_TFNVerificationStatus"))
        .set("date_of_birth", stg.opt("E314_DateOfBirth"))
        .set("family_name", stg.opt("E402_StudentFamilyName"))
        .set("given_name_first", stg.opt("E403_StudentGivenNameFirst"))
        .set("given_name_others", stg.opt("E404_StudentGivenNameOthers"))
        .set("residential_address_line1", stg.opt("E410_ResidentialAddressLine1"))
        .set("residential_address_suburb", stg.opt("E469_ResidentialAddressSuburb"))
        .set("residential_address_postcode", stg.opt("E320_ResidentialAddressPostcode"))
        .set("residential_address_state", stg.opt("E470_ResidentialAddressState"))
        .set("residential_address_country", stg.opt("E658_ResidentialAddressCountryCode"))
        .set("term_residence_postcode", stg.opt("E319_TermResidencePostcode"))
        .set("term_residence_country", stg.opt("E661_TermResidenceCountryCode"))
        .set("gender_code", stg.opt("E315_GenderCode"))
        .set("atsi_code", stg.opt("E316_ATSICode"))
        .set("country_of_birth_code", stg.opt("E346_CountryOfBirthCode"))
        .set("arrival_year", stg.opt("E347_ArrivalInAustraliaYear"))
        .set("language_home_code", stg.opt("E348_LanguageSpokenAtHomeCode"))
        .set("year_left_school", stg.opt("E572_YearLeftSchool"))
        .set("level_left_school", stg.opt("E612_LevelLeftSchool"))
        .set("highest_ed_parent1", stg.opt("E573_HighestEducationParent1"))
        .set("highest_ed_parent2", stg.opt("E574_HighestEducationParent2"))
        .stamped()
        .execute(ctx.conn, ctx.extraction_ts)?;

    Ok(StepOutcome::Applied { rows })
}

/// First-reported address has no natural key; its key is a hash of the row
pub fn upsert_student_contact(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(CONTACTS) else {
        return Ok(StepOutcome::skipped(CONTACTS));
    };

    let student_key = stg.col("UID8_StudentsResKey")?;
    let source_rows = Select::from(stg.name())
        .column(student_key.clone())
        .column(stg.opt("UID1_ProvidersResKey"))
        .column(stg.opt("E313_StudentIdentificationCode"))
        .column(stg.opt("E787_FirstResidentialAddressLine1"))
        .column(stg.opt("E789_FirstResidentialAddressSuburb"))
        .column(stg.opt("E791_FirstResidentialAddressState"))
        .column(stg.opt("E659_FirstResidentialAddressCountryCode"))
        .column(stg.opt("E790_FirstResidentialAddressPostcode"))
        .filter(Filter::Present(student_key))
        .fetch(ctx.conn, ctx.extraction_ts)?;

    let sql = values_upsert_sql(
        "bridge_student_contact",
        "student_contact_res_key",
        &[
            "student_contact_res_key",
            "student_res_key",
            "provider_res_key",
            "student_identifier",
            "first_address_line1",
            "first_address_suburb",
            "first_address_state",
            "first_address_country",
            "first_address_postcode",
            "extraction_timestamp",
        ],
    );
    let mut stmt = ctx.conn.prepare_cached(&sql)?;

    let mut rows = 0;
    for row in &source_rows {
        let key = derived_key(row, ctx.extraction_ts);
        let mut values: Vec<Option<String>> = Vec::with_capacity(row.len() + 2);
        values.push(Some(key));
        values.extend(row.iter().cloned());
        values.push(Some(ctx.extraction_ts.to_string()));
        rows += stmt.execute(params_from_iter(values.iter()))?;
    }

    Ok(StepOutcome::Applied { rows })
}

pub fn upsert_student_citizenship(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(CITIZENSHIPS) else {
        return Ok(StepOutcome::skipped(CITIZENSHIPS));
    };

    let rows = Upsert::into_table(
        "bridge_student_citizenship",
        "student_citizenship_res_key",
        stg.col("UID10_StudentCitizenshipsResKey")?,
    )
    .from(stg.name())
    .set("student_res_key", stg.col("UID8_StudentsResKey")?)
    .set("provider_res_key", stg.opt("UID1_ProvidersResKey"))
    .set("student_identifier", stg.opt("E313_StudentIdentificationCode"))
    .set("chessn", stg.opt("E488_CHESSN"))
    .set("citizen_resident_code", stg.col("E358_CitizenResidentCode")?)
    .set("effective_from_date", stg.opt("E609_EffectiveFromDate"))
    .set("effective_to_date", stg.opt("E610_EffectiveToDate"))
    .stamped()
    .execute(ctx.conn, ctx.extraction_ts)?;

    Ok(StepOutcome::Applied { rows })
}

pub fn upsert_student_disability(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let Some(stg) = ctx.staging(DISABILITIES) else {
        return Ok(StepOutcome::skipped(DISABILITIES));
    };

    let rows = Upsert::into_table(
        "bridge_student_disability",
        "student_disability_res_key",
        stg.col("UID11_StudentDisabilitiesResKey")?,
    )
    .from(stg.name())
    .set("student_res_key", stg.col("UID8_StudentsResKey")?)
    .set("provider_res_key", stg.opt("UID1_ProvidersResKey"))
    .set("student_identifier", stg.opt("E313_StudentIdentificationCode"))
    .set("chessn", stg.opt("E488_CHESSN"))
    .set("disability_code", stg.col("E615_DisabilityCode")?)
    .set("effective_from_date", stg.opt("E609_EffectiveFromDate"))
    .set("effective_to_date", stg.opt("E610_EffectiveToDate"))
    .stamped()
    .execute(ctx.conn, ctx.extraction_ts)?;

    Ok(StepOutcome::Applied { rows })
}
