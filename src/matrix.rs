//! The decision matrix: cross-validation of effective building age against
//! the AI condition score.
//!
//! A fixed two-dimensional table maps an age band and a score band to a
//! combined property category (1 = best .. 5 = worst) and an agreement
//! verdict. `Conflict` cells mark pairs where the two independent signals
//! disagree sharply (a brand-new building scoring like a ruin, or the
//! reverse); the final stage escalates the pipeline warning count by exactly
//! one for a conflict. `Caution` and `Match` carry no escalation.
//!
//! Lookup is a pure total function over the documented domain: bucketing uses
//! ordered half-open boundary checks (smallest matching bound wins), age is
//! open-ended upward, and scores run 0..=30. A score above
//! [`MAX_CONDITION_SCORE`] is an input-contract violation and fails fast
//! rather than being silently bucketed.

use serde::Serialize;

/// Upper bound of the condition-score scale produced by the condition agent.
pub const MAX_CONDITION_SCORE: u32 = 30;

/// How strongly the age and condition signals agree in one matrix cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Agreement {
    /// The signals confirm each other.
    Match,
    /// Plausible but worth a human glance; no automatic escalation.
    Caution,
    /// Sharp disagreement; always escalates the warning count by one.
    Conflict,
}

/// One cell of the matrix: the combined category plus the agreement verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MatrixCell {
    pub category: i64,
    pub agreement: Agreement,
}

/// Effective-age band (matrix row).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AgeBand {
    #[serde(rename = "0-5")]
    Y0To5,
    #[serde(rename = "6-15")]
    Y6To15,
    #[serde(rename = "16-30")]
    Y16To30,
    #[serde(rename = "31-50")]
    Y31To50,
    #[serde(rename = "51+")]
    Y51Plus,
}

/// Condition-score band (matrix column).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ScoreBand {
    #[serde(rename = "0-7")]
    S0To7,
    #[serde(rename = "8-15")]
    S8To15,
    #[serde(rename = "16-21")]
    S16To21,
    #[serde(rename = "22-26")]
    S22To26,
    #[serde(rename = "27-30")]
    S27To30,
}

/// Bucket an effective age into its matrix row. Total: `51+` is open-ended.
pub fn age_band(effective_age: u32) -> AgeBand {
    if effective_age <= 5 {
        AgeBand::Y0To5
    } else if effective_age <= 15 {
        AgeBand::Y6To15
    } else if effective_age <= 30 {
        AgeBand::Y16To30
    } else if effective_age <= 50 {
        AgeBand::Y31To50
    } else {
        AgeBand::Y51Plus
    }
}

/// Bucket a condition score into its matrix column.
///
/// # Panics
///
/// Panics if `score > MAX_CONDITION_SCORE`. The bucket functions cover the
/// whole domain by construction, so an out-of-range score is a bug in the
/// caller, not a runtime condition.
pub fn score_band(score: u32) -> ScoreBand {
    assert!(
        score <= MAX_CONDITION_SCORE,
        "condition score {score} outside 0..={MAX_CONDITION_SCORE}"
    );
    if score <= 7 {
        ScoreBand::S0To7
    } else if score <= 15 {
        ScoreBand::S8To15
    } else if score <= 21 {
        ScoreBand::S16To21
    } else if score <= 26 {
        ScoreBand::S22To26
    } else {
        ScoreBand::S27To30
    }
}

/// Look up the combined category and agreement for an age/score pair.
pub fn lookup(effective_age: u32, score: u32) -> MatrixCell {
    cell(age_band(effective_age), score_band(score))
}

fn cell(age: AgeBand, score: ScoreBand) -> MatrixCell {
    use AgeBand::*;
    use Agreement::*;
    use ScoreBand::*;

    let (category, agreement) = match (age, score) {
        (Y0To5, S27To30) => (1, Match),
        (Y0To5, S22To26) => (2, Caution),
        (Y0To5, S16To21) => (3, Conflict),
        (Y0To5, S8To15) => (4, Conflict),
        (Y0To5, S0To7) => (5, Conflict),

        (Y6To15, S27To30) => (1, Caution),
        (Y6To15, S22To26) => (2, Match),
        (Y6To15, S16To21) => (3, Caution),
        (Y6To15, S8To15) => (4, Conflict),
        (Y6To15, S0To7) => (5, Conflict),

        (Y16To30, S27To30) => (2, Conflict),
        (Y16To30, S22To26) => (2, Caution),
        (Y16To30, S16To21) => (3, Match),
        (Y16To30, S8To15) => (4, Caution),
        (Y16To30, S0To7) => (5, Conflict),

        (Y31To50, S27To30) => (2, Conflict),
        (Y31To50, S22To26) => (3, Caution),
        (Y31To50, S16To21) => (3, Caution),
        (Y31To50, S8To15) => (4, Match),
        (Y31To50, S0To7) => (5, Match),

        (Y51Plus, S27To30) => (3, Conflict),
        (Y51Plus, S22To26) => (3, Conflict),
        (Y51Plus, S16To21) => (3, Caution),
        (Y51Plus, S8To15) => (4, Match),
        (Y51Plus, S0To7) => (5, Match),
    };

    MatrixCell { category, agreement }
}
