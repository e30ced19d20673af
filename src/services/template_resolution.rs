use futures::future::join_all;
use time::OffsetDateTime;

use crate::domain::Submission;
use crate::repositories::{ClassFilter, GradingStore};
use crate::services::errors::GradingError;

/// Resolves the assessment template a submission is graded against.
///
/// Order: grading group, the hinted class's assessments, every class the
/// student attends, then the exam session.
pub(crate) async fn resolve_template(
    store: &dyn GradingStore,
    submission: &Submission,
) -> Result<String, GradingError> {
    if let Some(group_id) = &submission.grading_group_id {
        if let Some(group) = store.find_grading_group(group_id).await? {
            if let Some(template_id) = group.assessment_template_id {
                return Ok(template_id);
            }
        }
    }

    if let Some(class_assessment_id) = &submission.class_assessment_id {
        if let Some(class_id) = &submission.class_id {
            let assessments = store.list_class_assessments(class_id).await?;
            if let Some(template_id) = assessments
                .into_iter()
                .find(|assessment| &assessment.id == class_assessment_id)
                .and_then(|assessment| assessment.assessment_template_id)
            {
                return Ok(template_id);
            }
        }

        if let Some(template_id) =
            search_student_classes(store, &submission.student_id, class_assessment_id).await?
        {
            return Ok(template_id);
        }
    }

    if let Some(exam_session_id) = &submission.exam_session_id {
        if let Some(template_id) = store
            .find_exam_session(exam_session_id)
            .await?
            .and_then(|exam_session| exam_session.assessment_template_id)
        {
            return Ok(template_id);
        }
    }

    Err(GradingError::TemplateNotFound { submission_id: submission.id.clone() })
}

async fn search_student_classes(
    store: &dyn GradingStore,
    student_id: &str,
    class_assessment_id: &str,
) -> Result<Option<String>, GradingError> {
    let classes = store.list_classes(&ClassFilter::for_student(student_id)).await?;
    let lookups = classes.iter().map(|class| store.list_class_assessments(&class.id));

    for (class, result) in classes.iter().zip(join_all(lookups).await) {
        match result {
            Ok(assessments) => {
                if let Some(template_id) = assessments
                    .into_iter()
                    .find(|assessment| assessment.id == class_assessment_id)
                    .and_then(|assessment| assessment.assessment_template_id)
                {
                    return Ok(Some(template_id));
                }
            }
            Err(err) => {
                tracing::warn!(
                    class_id = %class.id,
                    error = %err,
                    "Skipping class during template lookup"
                );
            }
        }
    }

    Ok(None)
}

/// Rejects grading once the owning semester is over. A semester that cannot be
/// resolved, or has no end date, never blocks.
pub(crate) async fn ensure_semester_open(
    store: &dyn GradingStore,
    submission: &Submission,
    now: OffsetDateTime,
) -> Result<(), GradingError> {
    let Some(semester_id) = owning_semester_id(store, submission).await? else {
        return Ok(());
    };

    let Some(semester) = store.find_semester(&semester_id).await? else {
        return Ok(());
    };

    match semester.end_date {
        Some(end_date) if end_date < now => Err(GradingError::AlreadyEnded { semester_id }),
        _ => Ok(()),
    }
}

async fn owning_semester_id(
    store: &dyn GradingStore,
    submission: &Submission,
) -> Result<Option<String>, GradingError> {
    if let Some(class_id) = &submission.class_id {
        if let Some(class) = store.find_class(class_id).await? {
            return Ok(Some(class.semester_id));
        }
    }

    if let Some(exam_session_id) = &submission.exam_session_id {
        if let Some(semester_id) = store
            .find_exam_session(exam_session_id)
            .await?
            .and_then(|exam_session| exam_session.semester_id)
        {
            return Ok(Some(semester_id));
        }
    }

    Ok(None)
}
