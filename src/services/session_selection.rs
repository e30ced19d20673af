//! Picks the one completed session whose grade items count for statistics,
//! and turns it into a grade on the 10-point scale.

use serde::Serialize;

use crate::domain::{
    AssessmentMeta, AssessmentType, GradeItem, GradingSession, GradingStatus, GradingType,
};
use crate::services::reconciliation::latest_grade_items;

/// Rounds half away from zero to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Scales a raw score to 10 points. Without a known maximum the raw score is
/// assumed to be out of 100.
pub fn normalize_grade(total_score: f64, max_score: f64) -> f64 {
    if max_score > 0.0 {
        round2(total_score / max_score * 10.0)
    } else {
        round2(total_score / 10.0)
    }
}

fn latest<'a>(sessions: impl Iterator<Item = &'a GradingSession>) -> Option<&'a GradingSession> {
    sessions.max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
}

pub fn select_authoritative_session<'a>(
    sessions: &'a [GradingSession],
    meta: &AssessmentMeta,
) -> Option<&'a GradingSession> {
    let completed: Vec<&GradingSession> = sessions
        .iter()
        .filter(|session| session.status == GradingStatus::Completed)
        .collect();
    if completed.is_empty() {
        return None;
    }

    let lecturer = || {
        latest(completed.iter().copied().filter(|s| s.grading_type.is_lecturer_graded()))
    };
    let ai = || latest(completed.iter().copied().filter(|s| s.grading_type == GradingType::Ai));
    let any = || latest(completed.iter().copied());

    match (meta.effective_type(), meta.is_published) {
        (AssessmentType::Lab, true) => lecturer().or_else(ai).or_else(any),
        // An unpublished lab still has a meaningful auto-grade.
        (AssessmentType::Lab, false) => ai(),
        (AssessmentType::Assignment | AssessmentType::PracticalExam, true) => {
            lecturer().or_else(any)
        }
        (AssessmentType::Assignment | AssessmentType::PracticalExam, false) => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGrade {
    pub session_id: String,
    pub grading_type: GradingType,
    pub total_score: f64,
    pub max_score: f64,
    pub grade10: f64,
    /// True when the session had no grade items and its stored grade was used.
    pub from_stored_grade: bool,
}

/// Grade of a selected session from its deduplicated items. Sessions without
/// items fall back to their stored aggregate grade, already on the 10-point
/// scale; `None` when that is missing too.
pub fn grade_session(session: &GradingSession, items: &[GradeItem]) -> Option<SessionGrade> {
    let own: Vec<GradeItem> =
        items.iter().filter(|item| item.grading_session_id == session.id).cloned().collect();
    let latest = latest_grade_items(&own);

    if latest.is_empty() {
        return session.grade.map(|grade| SessionGrade {
            session_id: session.id.clone(),
            grading_type: session.grading_type,
            total_score: grade,
            max_score: 10.0,
            grade10: grade,
            from_stored_grade: true,
        });
    }

    let total_score: f64 = latest.iter().map(|item| item.score).sum();
    let max_score: f64 = latest.iter().map(|item| item.rubric_item_max_score).sum();

    Some(SessionGrade {
        session_id: session.id.clone(),
        grading_type: session.grading_type,
        total_score,
        max_score,
        grade10: normalize_grade(total_score, max_score),
        from_stored_grade: false,
    })
}
