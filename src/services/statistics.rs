use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::domain::{AssessmentMeta, AssessmentTemplate, Class, ClassAssessment, Submission};
use crate::repositories::{ClassFilter, GradingStore, StoreError};
use crate::services::aggregation::{aggregate_with_top_n, GradedSubmission, PerformanceReport};
use crate::services::errors::GradingError;
use crate::services::session_selection::{grade_session, select_authoritative_session};

/// Which classes a report covers. Unset fields do not narrow the crawl.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatisticsScope {
    #[serde(default)]
    pub(crate) semester_id: Option<String>,
    #[serde(default)]
    pub(crate) course_id: Option<String>,
    #[serde(default)]
    pub(crate) class_id: Option<String>,
    #[serde(default)]
    pub(crate) lecturer_id: Option<String>,
}

impl StatisticsScope {
    fn class_filter(&self) -> ClassFilter {
        ClassFilter {
            semester_id: self.semester_id.clone(),
            course_id: self.course_id.clone(),
            lecturer_id: self.lecturer_id.clone(),
            student_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct CrawlOptions {
    pub(crate) concurrency: usize,
    pub(crate) top_n: usize,
}

struct PendingSubmission {
    submission: Submission,
    class: Class,
    meta: AssessmentMeta,
}

/// Crawls every submission in scope, selects and grades its authoritative
/// session, and aggregates the result. Failures are logged and counted in the
/// report's `skipped_*` fields; only the class listing itself can fail it.
pub(crate) async fn build_performance_report(
    store: &dyn GradingStore,
    scope: &StatisticsScope,
    options: CrawlOptions,
) -> Result<PerformanceReport, GradingError> {
    let started = Instant::now();
    let classes = classes_in_scope(store, scope).await?;

    let assessment_lists =
        join_all(classes.iter().map(|class| store.list_class_assessments(&class.id))).await;
    let mut assessments: Vec<(&Class, ClassAssessment)> = Vec::new();
    let mut skipped_classes = 0;
    for (class, result) in classes.iter().zip(assessment_lists) {
        match result {
            Ok(list) => assessments.extend(list.into_iter().map(|assessment| (class, assessment))),
            Err(err) => {
                skipped_classes += 1;
                tracing::warn!(
                    class_id = %class.id,
                    error = %err,
                    "Skipping class in statistics crawl"
                );
            }
        }
    }

    let templates = load_templates(store, &assessments).await;

    let mut pending = Vec::new();
    let mut skipped_assessments = 0;
    let mut unresolved_submissions = 0;
    let submission_lists = join_all(
        assessments
            .iter()
            .map(|(_, assessment)| store.list_submissions_by_class_assessment(&assessment.id)),
    )
    .await;
    for ((class, assessment), result) in assessments.iter().zip(submission_lists) {
        let Some(template) =
            assessment.assessment_template_id.as_ref().and_then(|id| templates.get(id))
        else {
            skipped_assessments += 1;
            unresolved_submissions += result.as_ref().map_or(0, Vec::len);
            tracing::warn!(
                class_assessment_id = %assessment.id,
                "Skipping class assessment without a resolvable template"
            );
            continue;
        };
        let meta = AssessmentMeta {
            template_name: template.name.clone(),
            assessment_type: template.assessment_type,
            is_published: assessment.is_published,
        };

        match result {
            Ok(submissions) => pending.extend(submissions.into_iter().map(|submission| {
                PendingSubmission { submission, class: (*class).clone(), meta: meta.clone() }
            })),
            Err(err) => {
                skipped_assessments += 1;
                tracing::warn!(
                    class_assessment_id = %assessment.id,
                    error = %err,
                    "Skipping class assessment submissions"
                );
            }
        }
    }

    let labels = load_labels(store, &classes).await;

    let total = pending.len();
    let results: Vec<Option<GradedSubmission>> = stream::iter(pending)
        .map(|item| grade_pending(store, item))
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;
    let mut rows: Vec<GradedSubmission> = results.into_iter().flatten().collect();
    for row in &mut rows {
        row.course_name = labels.courses.get(&row.course_id).cloned();
        row.semester_code = labels.semesters.get(&row.semester_id).cloned();
    }
    let skipped = total - rows.len() + unresolved_submissions;

    let mut report = aggregate_with_top_n(&rows, options.top_n);
    report.skipped_submissions = skipped;
    report.skipped_classes = skipped_classes;
    report.skipped_assessments = skipped_assessments;

    metrics::counter!("statistics_submissions_skipped_total").increment(skipped as u64);
    metrics::counter!("statistics_batches_skipped_total", "kind" => "class")
        .increment(skipped_classes as u64);
    metrics::counter!("statistics_batches_skipped_total", "kind" => "assessment")
        .increment(skipped_assessments as u64);
    metrics::histogram!("statistics_report_duration_seconds")
        .record(started.elapsed().as_secs_f64());
    tracing::info!(
        classes = classes.len(),
        submissions = total,
        skipped,
        skipped_classes,
        skipped_assessments,
        graded_students = report.graded_students,
        "Statistics report built"
    );

    Ok(report)
}

async fn classes_in_scope(
    store: &dyn GradingStore,
    scope: &StatisticsScope,
) -> Result<Vec<Class>, GradingError> {
    let filter = scope.class_filter();
    match &scope.class_id {
        Some(class_id) => Ok(store
            .find_class(class_id)
            .await?
            .filter(|class| filter.matches(class))
            .into_iter()
            .collect()),
        None => Ok(store.list_classes(&filter).await?),
    }
}

#[derive(Default)]
struct GroupLabels {
    courses: HashMap<String, String>,
    semesters: HashMap<String, String>,
}

/// Course names and semester codes for report labels. Lookups that fail only
/// cost the label.
async fn load_labels(store: &dyn GradingStore, classes: &[Class]) -> GroupLabels {
    let course_ids: BTreeSet<&str> = classes.iter().map(|class| class.course_id.as_str()).collect();
    let semester_ids: BTreeSet<&str> =
        classes.iter().map(|class| class.semester_id.as_str()).collect();

    let (courses, semesters) = futures::join!(
        join_all(course_ids.iter().map(|id| store.find_course(id))),
        join_all(semester_ids.iter().map(|id| store.find_semester(id))),
    );

    let mut labels = GroupLabels::default();
    for result in courses {
        match result {
            Ok(Some(course)) => {
                labels.courses.insert(course.id, course.name);
            }
            Ok(None) => {}
            Err(err) => tracing::debug!(error = %err, "Course label lookup failed"),
        }
    }
    for result in semesters {
        match result {
            Ok(Some(semester)) => {
                labels.semesters.insert(semester.id, semester.code);
            }
            Ok(None) => {}
            Err(err) => tracing::debug!(error = %err, "Semester label lookup failed"),
        }
    }
    labels
}

/// Fetches each distinct template once per crawl.
async fn load_templates(
    store: &dyn GradingStore,
    assessments: &[(&Class, ClassAssessment)],
) -> HashMap<String, AssessmentTemplate> {
    let ids: BTreeSet<&str> = assessments
        .iter()
        .filter_map(|(_, assessment)| assessment.assessment_template_id.as_deref())
        .collect();

    let lookups = join_all(ids.iter().map(|id| store.find_assessment_template(id))).await;
    let mut templates = HashMap::new();
    for (id, result) in ids.iter().zip(lookups) {
        match result {
            Ok(Some(template)) => {
                templates.insert(id.to_string(), template);
            }
            Ok(None) => tracing::warn!(template_id = %id, "Assessment template not found"),
            Err(err) => {
                tracing::warn!(template_id = %id, error = %err, "Assessment template lookup failed")
            }
        }
    }
    templates
}

async fn grade_pending(
    store: &dyn GradingStore,
    pending: PendingSubmission,
) -> Option<GradedSubmission> {
    let submission_id = pending.submission.id.clone();
    match select_and_grade(store, &pending).await {
        Ok(grade10) => Some(GradedSubmission {
            submission_id: pending.submission.id,
            student_id: pending.submission.student_id,
            student_name: pending.submission.student_name,
            class_id: pending.class.id,
            class_code: Some(pending.class.class_code).filter(|code| !code.is_empty()),
            course_id: pending.class.course_id,
            course_name: None,
            semester_id: pending.class.semester_id,
            semester_code: None,
            lecturer_id: pending.class.lecturer_id,
            grade10,
        }),
        Err(err) => {
            tracing::warn!(
                submission_id = %submission_id,
                error = %err,
                "Skipping submission in statistics crawl"
            );
            None
        }
    }
}

async fn select_and_grade(
    store: &dyn GradingStore,
    pending: &PendingSubmission,
) -> Result<Option<f64>, StoreError> {
    let sessions = store.list_sessions_by_submission(&pending.submission.id).await?;
    let Some(session) = select_authoritative_session(&sessions, &pending.meta) else {
        return Ok(None);
    };

    let items = store.list_grade_items(&session.id).await?;
    Ok(grade_session(session, &items).map(|grade| grade.grade10))
}
