//! Giving-project members rating the applications assigned to their project.
use crate::db::grants as repo;
use crate::db::model::{Account, ApplicationRating, GrantApplication, RatingScores};
use crate::db::Pool;
use crate::forms::{self, FieldErrors, FormData};
use crate::grants::WorkflowError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};

pub const SCORE_RANGE: std::ops::RangeInclusive<i64> = 1..=10;
pub const OUT_OF_RANGE: &str = "Enter a score from 1 to 10.";

const SCORE_FIELDS: [&str; 5] = [
    "program",
    "diversity",
    "soundness",
    "lack_of_access",
    "collaboration",
];

/// Weighted total; the program score gets a tenth more with either bonus.
pub fn total(scores: &RatingScores, bonus: bool) -> f64 {
    let s = |v: Option<i64>| v.unwrap_or(0) as f64;
    let multiplier = if bonus { 1.1 } else { 1.0 };
    s(scores.program) * 7.0 * multiplier
        + s(scores.diversity) * 5.0
        + s(scores.soundness) * 4.0
        + s(scores.lack_of_access) * 2.0
        + s(scores.collaboration) * 2.0
}

fn has_bonus(app: &GrantApplication) -> bool {
    app.scoring_bonus_poc || app.scoring_bonus_geo
}

/// Parses the rating form. Saving allows blanks; submitting needs all five.
pub fn parse_scores(form: &FormData, submitting: bool) -> Result<RatingScores, FieldErrors> {
    let mut errors = FieldErrors::new();
    let mut values = [None; 5];
    for (slot, field) in values.iter_mut().zip(SCORE_FIELDS) {
        match forms::parse_int(&form.text(field)) {
            Ok(Some(v)) if SCORE_RANGE.contains(&v) => *slot = Some(v),
            Ok(Some(_)) => errors.add(field, OUT_OF_RANGE),
            Ok(None) if submitting => errors.add(field, forms::REQUIRED),
            Ok(None) => {}
            Err(msg) => errors.add(field, msg),
        }
    }
    errors.into_result()?;
    let [program, diversity, soundness, lack_of_access, collaboration] = values;
    Ok(RatingScores {
        program,
        diversity,
        soundness,
        lack_of_access,
        collaboration,
        comments: form.text("comments"),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoringPage {
    pub application_id: i64,
    pub rating: Option<ApplicationRating>,
    pub total: Option<f64>,
}

async fn rater(pool: &Pool, account: &Account, app_id: i64) -> Result<(GrantApplication, i64), WorkflowError> {
    let app = repo::get_application(pool, app_id)
        .await?
        .ok_or(WorkflowError::NotFound("application"))?;
    let ship_id = repo::assigned_membership_for(pool, &account.email, app.id)
        .await?
        .ok_or(WorkflowError::NotFound("application"))?;
    Ok((app, ship_id))
}

/// The caller's rating of an application, if any.
#[instrument(skip_all)]
pub async fn page(pool: &Pool, account: &Account, app_id: i64) -> Result<ScoringPage, WorkflowError> {
    let (app, ship_id) = rater(pool, account, app_id).await?;
    let rating = repo::get_rating(pool, app.id, ship_id).await?;
    let total = rating.as_ref().map(|r| total(&r.scores, has_bonus(&app)));
    Ok(ScoringPage {
        application_id: app.id,
        rating,
        total,
    })
}

/// Saves the caller's rating; `submit` marks it final.
#[instrument(skip_all)]
pub async fn save(
    pool: &Pool,
    account: &Account,
    app_id: i64,
    form: &FormData,
    now: DateTime<Utc>,
) -> Result<f64, WorkflowError> {
    let (app, ship_id) = rater(pool, account, app_id).await?;
    let submitting = form.flag("submit");
    let scores = parse_scores(form, submitting)?;
    repo::save_rating(pool, app.id, ship_id, &scores, submitting.then_some(now)).await?;
    let total = total(&scores, has_bonus(&app));
    info!(app_id, ship_id, submitting, total, "rating saved");
    Ok(total)
}

#[derive(Debug, Clone, Serialize)]
pub struct RatingRow {
    pub rating: ApplicationRating,
    pub total: f64,
}

/// Every rating of an application, for staff.
pub async fn ratings(pool: &Pool, app_id: i64) -> Result<Vec<RatingRow>, WorkflowError> {
    let app = repo::get_application(pool, app_id)
        .await?
        .ok_or(WorkflowError::NotFound("application"))?;
    let bonus = has_bonus(&app);
    Ok(repo::ratings_for_application(pool, app.id)
        .await?
        .into_iter()
        .map(|rating| RatingRow {
            total: total(&rating.scores, bonus),
            rating,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores() -> RatingScores {
        RatingScores {
            program: Some(10),
            diversity: Some(8),
            soundness: Some(6),
            lack_of_access: Some(5),
            collaboration: Some(4),
            comments: String::new(),
        }
    }

    #[test]
    fn weighted_total() {
        assert!((total(&scores(), false) - 152.0).abs() < 1e-9);
        assert!((total(&scores(), true) - 159.0).abs() < 1e-9);
    }

    #[test]
    fn scores_must_be_in_range() {
        let form = FormData::from_pairs([("program", "11"), ("diversity", "x"), ("soundness", "3")]);
        let errors = parse_scores(&form, false).unwrap_err();
        assert_eq!(errors.get("program").unwrap(), [OUT_OF_RANGE]);
        assert!(errors.has("diversity"));
        assert!(!errors.has("lack_of_access"));

        let form = FormData::from_pairs([("soundness", "3")]);
        assert!(parse_scores(&form, false).is_ok());
        assert_eq!(parse_scores(&form, true).unwrap_err().len(), 4);
    }
}
