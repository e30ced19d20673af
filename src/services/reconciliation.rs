//! Blends persisted grade items with unsaved edits into one effective score per
//! rubric item. Priority: local edit, then the latest persisted item of the
//! active session, then zero.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::domain::{GradeItem, GradingQuestion, GradingSession, RubricItem, ValidationError};

const SCORE_EPSILON: f64 = 1e-9;

/// Unsaved overlay held by an editing session. Values are raw user input;
/// they are checked against the rubric when a save is planned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalEdits {
    scores: HashMap<(String, String), f64>,
    comments: HashMap<String, String>,
}

impl LocalEdits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_score(
        &mut self,
        question_id: impl Into<String>,
        rubric_item_id: impl Into<String>,
        score: f64,
    ) {
        self.scores.insert((question_id.into(), rubric_item_id.into()), score);
    }

    pub fn set_comment(&mut self, question_id: impl Into<String>, comment: impl Into<String>) {
        self.comments.insert(question_id.into(), comment.into());
    }

    pub fn score(&self, question_id: &str, rubric_item_id: &str) -> Option<f64> {
        self.scores.get(&(question_id.to_string(), rubric_item_id.to_string())).copied()
    }

    pub fn comment(&self, question_id: &str) -> Option<&str> {
        self.comments.get(question_id).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.scores.clear();
        self.comments.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty() && self.comments.is_empty()
    }

    /// Checks every edit against `questions`: targets must exist and scores
    /// must lie within their rubric bounds. Reconciliation alone ignores edits
    /// for unknown targets, so a save runs this first.
    pub fn validate(&self, questions: &[GradingQuestion]) -> Result<(), ValidationError> {
        let mut scores: Vec<(&(String, String), &f64)> = self.scores.iter().collect();
        scores.sort_by(|a, b| a.0.cmp(b.0));
        for ((question_id, rubric_item_id), score) in scores {
            let rubric = find_rubric_item(questions, question_id, rubric_item_id)?;
            validate_score(rubric_item_id, *score, rubric.max_score)?;
        }

        let mut commented: Vec<&String> = self.comments.keys().collect();
        commented.sort();
        for question_id in commented {
            find_question(questions, question_id)?;
        }
        Ok(())
    }
}

fn find_question<'a>(
    questions: &'a [GradingQuestion],
    question_id: &str,
) -> Result<&'a GradingQuestion, ValidationError> {
    questions
        .iter()
        .find(|question| question.id == question_id)
        .ok_or_else(|| ValidationError::UnknownQuestion { question_id: question_id.to_string() })
}

fn find_rubric_item<'a>(
    questions: &'a [GradingQuestion],
    question_id: &str,
    rubric_item_id: &str,
) -> Result<&'a RubricItem, ValidationError> {
    find_question(questions, question_id)?.rubric_item(rubric_item_id).ok_or_else(|| {
        ValidationError::UnknownRubricItem { rubric_item_id: rubric_item_id.to_string() }
    })
}

/// Where an effective value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueSource {
    LocalEdit,
    Persisted,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledRubricItem {
    pub rubric_item_id: String,
    pub description: String,
    pub max_score: f64,
    pub score: f64,
    pub source: ValueSource,
    /// Persisted row an update should target, when the active session has one.
    pub grade_item_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledQuestion {
    pub question_id: String,
    pub title: String,
    pub rubric_items: Vec<ReconciledRubricItem>,
    pub comment: Option<String>,
    pub comment_source: ValueSource,
    pub total_score: f64,
    pub max_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledQuestions {
    /// Session whose items were used; `None` when the submission has none yet.
    pub session_id: Option<String>,
    pub questions: Vec<ReconciledQuestion>,
    pub total_score: f64,
    pub max_score: f64,
}

/// Most recently created session, id as the final tie-break.
pub fn latest_session(sessions: &[GradingSession]) -> Option<&GradingSession> {
    sessions
        .iter()
        .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
}

/// Sorts by `updated_at` desc, then `created_at` desc, and keeps the first row
/// per rubric item. The result stays in recency order.
pub fn latest_grade_items(items: &[GradeItem]) -> Vec<&GradeItem> {
    let mut ordered: Vec<&GradeItem> = items.iter().collect();
    ordered.sort_by(|a, b| b.recency().cmp(&a.recency()).then_with(|| b.id.cmp(&a.id)));

    let mut seen = HashSet::new();
    ordered.retain(|item| seen.insert(item.rubric_item_id.as_str()));
    ordered
}

fn clamp_score(score: f64, max_score: f64) -> f64 {
    if !score.is_finite() {
        return 0.0;
    }
    score.clamp(0.0, max_score.max(0.0))
}

pub fn reconcile(
    questions: &[GradingQuestion],
    sessions: &[GradingSession],
    items: &[GradeItem],
    edits: &LocalEdits,
) -> ReconciledQuestions {
    let active = latest_session(sessions);
    let session_items: Vec<GradeItem> = match active {
        Some(session) => items
            .iter()
            .filter(|item| item.grading_session_id == session.id)
            .cloned()
            .collect(),
        None => Vec::new(),
    };
    let latest = latest_grade_items(&session_items);
    let by_rubric: HashMap<&str, &GradeItem> =
        latest.iter().map(|item| (item.rubric_item_id.as_str(), *item)).collect();

    let questions: Vec<ReconciledQuestion> = questions
        .iter()
        .map(|question| reconcile_question(question, &latest, &by_rubric, edits))
        .collect();

    let total_score = questions.iter().map(|question| question.total_score).sum();
    let max_score = questions.iter().map(|question| question.max_score).sum();

    ReconciledQuestions {
        session_id: active.map(|session| session.id.clone()),
        questions,
        total_score,
        max_score,
    }
}

fn reconcile_question(
    question: &GradingQuestion,
    latest: &[&GradeItem],
    by_rubric: &HashMap<&str, &GradeItem>,
    edits: &LocalEdits,
) -> ReconciledQuestion {
    let rubric_items: Vec<ReconciledRubricItem> = question
        .rubric_items
        .iter()
        .map(|rubric| reconcile_rubric_item(&question.id, rubric, by_rubric, edits))
        .collect();

    let (comment, comment_source) = match edits.comment(&question.id) {
        Some(comment) => (Some(comment.to_string()), ValueSource::LocalEdit),
        None => {
            let persisted = latest
                .iter()
                .filter(|item| question.rubric_item(&item.rubric_item_id).is_some())
                .filter_map(|item| item.comments.as_deref())
                .find(|comment| !comment.trim().is_empty());
            match persisted {
                Some(comment) => (Some(comment.to_string()), ValueSource::Persisted),
                None => (None, ValueSource::Default),
            }
        }
    };

    ReconciledQuestion {
        question_id: question.id.clone(),
        title: question.title.clone(),
        total_score: rubric_items.iter().map(|item| item.score).sum(),
        max_score: rubric_items.iter().map(|item| item.max_score).sum(),
        rubric_items,
        comment,
        comment_source,
    }
}

fn reconcile_rubric_item(
    question_id: &str,
    rubric: &RubricItem,
    by_rubric: &HashMap<&str, &GradeItem>,
    edits: &LocalEdits,
) -> ReconciledRubricItem {
    let persisted = by_rubric.get(rubric.id.as_str());
    let (score, source) = match (edits.score(question_id, &rubric.id), persisted) {
        (Some(score), _) => (score, ValueSource::LocalEdit),
        (None, Some(item)) => (clamp_score(item.score, rubric.max_score), ValueSource::Persisted),
        (None, None) => (0.0, ValueSource::Default),
    };

    ReconciledRubricItem {
        rubric_item_id: rubric.id.clone(),
        description: rubric.description.clone(),
        max_score: rubric.max_score,
        score,
        source,
        grade_item_id: persisted.map(|item| item.id.clone()),
    }
}

/// Checks one score against its rubric maximum.
pub fn validate_score(
    rubric_item_id: &str,
    score: f64,
    max_score: f64,
) -> Result<(), ValidationError> {
    if !score.is_finite() {
        return Err(ValidationError::NonFiniteScore { rubric_item_id: rubric_item_id.to_string() });
    }
    if score < 0.0 {
        return Err(ValidationError::NegativeScore {
            rubric_item_id: rubric_item_id.to_string(),
            score,
        });
    }
    if score > max_score + SCORE_EPSILON {
        return Err(ValidationError::ScoreExceedsMax {
            rubric_item_id: rubric_item_id.to_string(),
            score,
            max_score,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedWrite {
    pub question_id: String,
    pub rubric_item_id: String,
    /// Update target; a create is issued when absent.
    pub existing_item_id: Option<String>,
    pub score: f64,
    pub comments: Option<String>,
}

/// Every grade-item write one save performs, already validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePlan {
    pub session_id: Option<String>,
    pub writes: Vec<PlannedWrite>,
    pub total_score: f64,
}

impl ReconciledQuestions {
    /// Validates every effective score before anything is written. A single
    /// out-of-range value rejects the whole plan.
    pub fn save_plan(&self) -> Result<SavePlan, ValidationError> {
        let mut writes = Vec::new();
        for question in &self.questions {
            for item in &question.rubric_items {
                validate_score(&item.rubric_item_id, item.score, item.max_score)?;
                writes.push(PlannedWrite {
                    question_id: question.question_id.clone(),
                    rubric_item_id: item.rubric_item_id.clone(),
                    existing_item_id: item.grade_item_id.clone(),
                    score: item.score,
                    comments: question.comment.clone(),
                });
            }
        }

        Ok(SavePlan { session_id: self.session_id.clone(), writes, total_score: self.total_score })
    }
}

/// One submission's editing session: persisted state plus the local overlay,
/// with the reconciled view recomputed after every change.
#[derive(Debug, Clone)]
pub struct GradingDraft {
    submission_id: String,
    questions: Vec<GradingQuestion>,
    sessions: Vec<GradingSession>,
    items: Vec<GradeItem>,
    edits: LocalEdits,
    view: ReconciledQuestions,
}

impl GradingDraft {
    pub fn new(
        submission_id: impl Into<String>,
        questions: Vec<GradingQuestion>,
        sessions: Vec<GradingSession>,
        items: Vec<GradeItem>,
    ) -> Self {
        let edits = LocalEdits::new();
        let view = reconcile(&questions, &sessions, &items, &edits);
        Self { submission_id: submission_id.into(), questions, sessions, items, edits, view }
    }

    pub fn submission_id(&self) -> &str {
        &self.submission_id
    }

    pub fn reconciled(&self) -> &ReconciledQuestions {
        &self.view
    }

    pub fn edits(&self) -> &LocalEdits {
        &self.edits
    }

    pub fn total_score(&self) -> f64 {
        self.view.total_score
    }

    pub fn max_score(&self) -> f64 {
        self.view.max_score
    }

    pub fn is_dirty(&self) -> bool {
        !self.edits.is_empty()
    }

    /// Records a score edit and returns the new total. Out-of-range values are
    /// rejected and leave the draft untouched.
    pub fn set_score(
        &mut self,
        question_id: &str,
        rubric_item_id: &str,
        score: f64,
    ) -> Result<f64, ValidationError> {
        let rubric = find_rubric_item(&self.questions, question_id, rubric_item_id)?;
        validate_score(rubric_item_id, score, rubric.max_score)?;
        self.edits.set_score(question_id, rubric_item_id, score);
        self.refresh();
        Ok(self.view.total_score)
    }

    pub fn set_comment(&mut self, question_id: &str, comment: &str) -> Result<(), ValidationError> {
        find_question(&self.questions, question_id)?;
        self.edits.set_comment(question_id, comment);
        self.refresh();
        Ok(())
    }

    /// Drops unsaved edits, e.g. when the user switches submission.
    pub fn discard(&mut self) {
        self.edits.clear();
        self.refresh();
    }

    pub fn commit(&self) -> Result<SavePlan, ValidationError> {
        self.view.save_plan()
    }

    /// Swaps in freshly fetched persisted state after a save and clears the overlay.
    pub fn replace_persisted(&mut self, sessions: Vec<GradingSession>, items: Vec<GradeItem>) {
        self.sessions = sessions;
        self.items = items;
        self.edits.clear();
        self.refresh();
    }

    fn refresh(&mut self) {
        self.view = reconcile(&self.questions, &self.sessions, &self.items, &self.edits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{item, question, session};

    fn two_questions() -> Vec<GradingQuestion> {
        vec![question("q1", &[("r1", 5.0), ("r2", 5.0)]), question("q2", &[("r3", 10.0)])]
    }

    #[test]
    fn newest_row_per_rubric_item_wins() {
        let sessions = vec![session("gs-1", "sub-1", "COMPLETED", "LECTURER", 1)];
        let items = vec![
            item("gi-1", "gs-1", "r1", 2.0, 5.0, 1, Some(2)),
            item("gi-2", "gs-1", "r1", 4.0, 5.0, 1, Some(5)),
            item("gi-3", "gs-1", "r1", 1.0, 5.0, 3, None),
        ];

        let result = reconcile(&two_questions(), &sessions, &items, &LocalEdits::new());
        let r1 = &result.questions[0].rubric_items[0];

        assert_eq!(r1.score, 4.0);
        assert_eq!(r1.grade_item_id.as_deref(), Some("gi-2"));
        assert_eq!(r1.source, ValueSource::Persisted);
    }

    #[test]
    fn created_at_breaks_updated_at_ties() {
        let sessions = vec![session("gs-1", "sub-1", "COMPLETED", "AI", 1)];
        let items = vec![
            item("gi-1", "gs-1", "r3", 6.0, 10.0, 1, Some(4)),
            item("gi-2", "gs-1", "r3", 8.0, 10.0, 2, Some(4)),
        ];

        let result = reconcile(&two_questions(), &sessions, &items, &LocalEdits::new());
        assert_eq!(result.questions[1].rubric_items[0].score, 8.0);
    }

    #[test]
    fn only_latest_session_items_count() {
        let sessions = vec![
            session("gs-old", "sub-1", "COMPLETED", "AI", 1),
            session("gs-new", "sub-1", "COMPLETED", "LECTURER", 5),
        ];
        let items = vec![
            item("gi-1", "gs-old", "r1", 5.0, 5.0, 1, None),
            item("gi-2", "gs-new", "r2", 3.0, 5.0, 6, None),
        ];

        let result = reconcile(&two_questions(), &sessions, &items, &LocalEdits::new());

        assert_eq!(result.session_id.as_deref(), Some("gs-new"));
        assert_eq!(result.questions[0].rubric_items[0].source, ValueSource::Default);
        assert_eq!(result.questions[0].rubric_items[0].score, 0.0);
        assert_eq!(result.questions[0].rubric_items[1].score, 3.0);
        assert_eq!(result.total_score, 3.0);
        assert_eq!(result.max_score, 20.0);
    }

    #[test]
    fn local_edit_overrides_persisted_score_and_comment() {
        let sessions = vec![session("gs-1", "sub-1", "COMPLETED", "AI", 1)];
        let mut persisted = item("gi-1", "gs-1", "r1", 4.0, 5.0, 1, None);
        persisted.comments = Some("AI says fine".to_string());
        let items = vec![persisted];
        let mut edits = LocalEdits::new();
        edits.set_score("q1", "r1", 1.5);
        edits.set_comment("q1", "Missing edge cases");

        let result = reconcile(&two_questions(), &sessions, &items, &edits);
        let q1 = &result.questions[0];

        assert_eq!(q1.rubric_items[0].score, 1.5);
        assert_eq!(q1.rubric_items[0].source, ValueSource::LocalEdit);
        assert_eq!(q1.comment.as_deref(), Some("Missing edge cases"));
        assert_eq!(q1.comment_source, ValueSource::LocalEdit);
    }

    #[test]
    fn comment_comes_from_most_recent_non_empty_row() {
        let sessions = vec![session("gs-1", "sub-1", "COMPLETED", "AI", 1)];
        let mut older = item("gi-1", "gs-1", "r1", 4.0, 5.0, 1, None);
        older.comments = Some("older note".to_string());
        let mut newer = item("gi-2", "gs-1", "r2", 4.0, 5.0, 3, None);
        newer.comments = Some("   ".to_string());
        let mut other_question = item("gi-3", "gs-1", "r3", 4.0, 10.0, 4, None);
        other_question.comments = Some("q2 note".to_string());

        let items = [older, newer, other_question];
        let result = reconcile(&two_questions(), &sessions, &items, &LocalEdits::new());

        assert_eq!(result.questions[0].comment.as_deref(), Some("older note"));
        assert_eq!(result.questions[1].comment.as_deref(), Some("q2 note"));
    }

    #[test]
    fn stale_persisted_scores_are_clamped() {
        let sessions = vec![session("gs-1", "sub-1", "COMPLETED", "AI", 1)];
        let items = vec![
            item("gi-1", "gs-1", "r1", 9.0, 10.0, 1, None),
            item("gi-2", "gs-1", "r2", -2.0, 5.0, 1, None),
        ];

        let result = reconcile(&two_questions(), &sessions, &items, &LocalEdits::new());

        assert_eq!(result.questions[0].rubric_items[0].score, 5.0);
        assert_eq!(result.questions[0].rubric_items[1].score, 0.0);
    }

    #[test]
    fn save_plan_rejects_any_score_above_max() {
        let mut edits = LocalEdits::new();
        edits.set_score("q1", "r1", 3.0);
        edits.set_score("q2", "r3", 10.5);

        let result = reconcile(&two_questions(), &[], &[], &edits);
        let err = result.save_plan().expect_err("over max");

        assert!(matches!(
            err,
            ValidationError::ScoreExceedsMax { ref rubric_item_id, .. } if rubric_item_id == "r3"
        ));
    }

    #[test]
    fn save_plan_updates_existing_and_creates_missing() {
        let sessions = vec![session("gs-1", "sub-1", "COMPLETED", "AI", 1)];
        let items = vec![item("gi-1", "gs-1", "r1", 4.0, 5.0, 1, None)];
        let mut edits = LocalEdits::new();
        edits.set_comment("q1", "ok");

        let plan = reconcile(&two_questions(), &sessions, &items, &edits)
            .save_plan()
            .expect("plan");

        assert_eq!(plan.session_id.as_deref(), Some("gs-1"));
        assert_eq!(plan.writes.len(), 3);
        assert_eq!(plan.writes[0].existing_item_id.as_deref(), Some("gi-1"));
        assert_eq!(plan.writes[0].comments.as_deref(), Some("ok"));
        assert!(plan.writes[1].existing_item_id.is_none());
        assert_eq!(plan.total_score, 4.0);
    }

    #[test]
    fn draft_recomputes_total_on_every_edit() {
        let mut draft = GradingDraft::new("sub-1", two_questions(), Vec::new(), Vec::new());

        assert_eq!(draft.set_score("q1", "r1", 2.5).expect("edit"), 2.5);
        assert_eq!(draft.set_score("q2", "r3", 7.0).expect("edit"), 9.5);
        assert!(draft.is_dirty());

        let err = draft.set_score("q1", "r2", 6.0).expect_err("too high");
        assert!(matches!(err, ValidationError::ScoreExceedsMax { .. }));
        assert_eq!(draft.total_score(), 9.5);

        draft.discard();
        assert_eq!(draft.total_score(), 0.0);
        assert!(!draft.is_dirty());
    }

    #[test]
    fn draft_rejects_unknown_targets() {
        let mut draft = GradingDraft::new("sub-1", two_questions(), Vec::new(), Vec::new());

        assert!(matches!(
            draft.set_score("q1", "r9", 1.0),
            Err(ValidationError::UnknownRubricItem { .. })
        ));
        assert!(matches!(
            draft.set_comment("q9", "hello"),
            Err(ValidationError::UnknownQuestion { .. })
        ));
        assert!(matches!(
            draft.set_score("q1", "r1", -1.0),
            Err(ValidationError::NegativeScore { .. })
        ));
    }

    #[test]
    fn draft_commit_then_refresh_from_persisted() {
        let sessions = vec![session("gs-1", "sub-1", "PROCESSING", "LECTURER", 1)];
        let items = vec![item("gi-1", "gs-1", "r1", 2.0, 5.0, 1, None)];
        let mut draft = GradingDraft::new("sub-1", two_questions(), sessions.clone(), items);
        draft.set_score("q1", "r2", 4.0).expect("edit");

        let plan = draft.commit().expect("plan");
        assert_eq!(plan.session_id.as_deref(), Some("gs-1"));
        assert_eq!(plan.total_score, 6.0);

        let saved = vec![
            item("gi-1", "gs-1", "r1", 2.0, 5.0, 1, None),
            item("gi-2", "gs-1", "r2", 4.0, 5.0, 2, None),
        ];
        draft.replace_persisted(sessions, saved);

        assert!(!draft.is_dirty());
        assert_eq!(draft.submission_id(), "sub-1");
        assert_eq!(draft.total_score(), 6.0);
        let rubric = &draft.reconciled().questions[0].rubric_items;
        assert!(rubric.iter().all(|entry| entry.source == ValueSource::Persisted));
    }
}
