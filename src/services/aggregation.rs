//! Scan-and-fold over normalized submission grades. Everything is computed
//! from the rows passed in; nothing is cached between calls.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::services::session_selection::round2;

/// Mean grade at or above which a student passes.
pub const PASS_THRESHOLD: f64 = 5.0;
pub const DEFAULT_TOP_N: usize = 20;

/// One submission after session selection. `grade10` is `None` when no session
/// was eligible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedSubmission {
    pub submission_id: String,
    pub student_id: String,
    #[serde(default)]
    pub student_name: Option<String>,
    pub class_id: String,
    #[serde(default)]
    pub class_code: Option<String>,
    pub course_id: String,
    #[serde(default)]
    pub course_name: Option<String>,
    pub semester_id: String,
    #[serde(default)]
    pub semester_code: Option<String>,
    #[serde(default)]
    pub lecturer_id: Option<String>,
    #[serde(default)]
    pub grade10: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GradeBand {
    A,
    B,
    C,
    D,
    F,
}

impl GradeBand {
    /// Lower bounds are inclusive: F <4.0, D [4.0,5.5), C [5.5,7.0), B [7.0,8.5), A >=8.5.
    pub fn from_grade(grade: f64) -> Self {
        if grade >= 8.5 {
            Self::A
        } else if grade >= 7.0 {
            Self::B
        } else if grade >= 5.5 {
            Self::C
        } else if grade >= 4.0 {
            Self::D
        } else {
            Self::F
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GradeDistribution {
    #[serde(rename = "A")]
    pub a: usize,
    #[serde(rename = "B")]
    pub b: usize,
    #[serde(rename = "C")]
    pub c: usize,
    #[serde(rename = "D")]
    pub d: usize,
    #[serde(rename = "F")]
    pub f: usize,
}

impl GradeDistribution {
    fn record(&mut self, grade: f64) {
        match GradeBand::from_grade(grade) {
            GradeBand::A => self.a += 1,
            GradeBand::B => self.b += 1,
            GradeBand::C => self.c += 1,
            GradeBand::D => self.d += 1,
            GradeBand::F => self.f += 1,
        }
    }

    pub fn count(&self, band: GradeBand) -> usize {
        match band {
            GradeBand::A => self.a,
            GradeBand::B => self.b,
            GradeBand::C => self.c,
            GradeBand::D => self.d,
            GradeBand::F => self.f,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub key: String,
    pub label: Option<String>,
    pub average_grade: f64,
    pub student_count: usize,
    pub pass_count: usize,
    pub fail_count: usize,
    pub pass_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRanking {
    pub rank: usize,
    pub student_id: String,
    pub student_name: Option<String>,
    pub average_grade: f64,
    pub graded_submissions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRanking {
    pub rank: usize,
    pub class_id: String,
    pub class_code: Option<String>,
    pub average_grade: f64,
    pub student_count: usize,
    pub pass_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub total_submissions: usize,
    pub distinct_students: usize,
    pub graded_students: usize,
    pub not_graded: usize,
    pub pass_count: usize,
    pub fail_count: usize,
    pub pass_rate: f64,
    pub average_grade: f64,
    pub distribution: GradeDistribution,
    pub by_class: Vec<GroupStats>,
    pub by_course: Vec<GroupStats>,
    pub by_semester: Vec<GroupStats>,
    pub by_lecturer: Vec<GroupStats>,
    pub top_students: Vec<StudentRanking>,
    pub bottom_students: Vec<StudentRanking>,
    pub top_classes: Vec<ClassRanking>,
    pub submission_rate: f64,
    pub grading_completion_rate: f64,
    /// Submissions dropped by the crawl after a backend error, including
    /// those of assessments whose template could not be resolved.
    pub skipped_submissions: usize,
    /// Classes whose assessment listing failed; their submissions are unknown.
    pub skipped_classes: usize,
    /// Class assessments left out because their submissions or template
    /// could not be loaded.
    pub skipped_assessments: usize,
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round2(part as f64 / whole as f64 * 100.0)
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Per-student mean over graded rows. Students with no graded row are absent.
fn student_means<'a>(rows: impl Iterator<Item = &'a GradedSubmission>) -> BTreeMap<&'a str, f64> {
    let mut grades: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for row in rows {
        if let Some(grade) = row.grade10 {
            grades.entry(row.student_id.as_str()).or_default().push(grade);
        }
    }
    grades.into_iter().filter_map(|(student, values)| mean(&values).map(|m| (student, m))).collect()
}

fn group_by<'a, F>(rows: &'a [GradedSubmission], key_of: F) -> Vec<GroupStats>
where
    F: Fn(&'a GradedSubmission) -> Option<(&'a str, Option<&'a str>)>,
{
    let mut groups: BTreeMap<&str, (Option<&str>, Vec<&GradedSubmission>)> = BTreeMap::new();
    for row in rows {
        if let Some((key, label)) = key_of(row) {
            let entry = groups.entry(key).or_insert((None, Vec::new()));
            if entry.0.is_none() {
                entry.0 = label;
            }
            entry.1.push(row);
        }
    }

    let mut stats: Vec<GroupStats> = groups
        .into_iter()
        .filter_map(|(key, (label, members))| {
            let means: Vec<f64> = student_means(members.into_iter()).into_values().collect();
            let average = mean(&means)?;
            let pass_count = means.iter().filter(|grade| **grade >= PASS_THRESHOLD).count();
            let fail_count = means.len() - pass_count;
            Some(GroupStats {
                key: key.to_string(),
                label: label.map(str::to_string),
                average_grade: round2(average),
                student_count: means.len(),
                pass_count,
                fail_count,
                pass_rate: percentage(pass_count, means.len()),
            })
        })
        .collect();

    stats.sort_by(|a, b| {
        b.average_grade.total_cmp(&a.average_grade).then_with(|| a.key.cmp(&b.key))
    });
    stats
}

pub fn aggregate(rows: &[GradedSubmission]) -> PerformanceReport {
    aggregate_with_top_n(rows, DEFAULT_TOP_N)
}

pub fn aggregate_with_top_n(rows: &[GradedSubmission], top_n: usize) -> PerformanceReport {
    let distinct_students: BTreeSet<&str> =
        rows.iter().map(|row| row.student_id.as_str()).collect();
    let means = student_means(rows.iter());

    let mut distribution = GradeDistribution::default();
    let mut pass_count = 0;
    for grade in means.values() {
        distribution.record(*grade);
        if *grade >= PASS_THRESHOLD {
            pass_count += 1;
        }
    }
    let graded_students = means.len();
    let fail_count = graded_students - pass_count;
    let all_means: Vec<f64> = means.values().copied().collect();

    let by_class = group_by(rows, |row| Some((row.class_id.as_str(), row.class_code.as_deref())));
    let by_course =
        group_by(rows, |row| Some((row.course_id.as_str(), row.course_name.as_deref())));
    let by_semester =
        group_by(rows, |row| Some((row.semester_id.as_str(), row.semester_code.as_deref())));
    let by_lecturer = group_by(rows, |row| row.lecturer_id.as_deref().map(|id| (id, None)));

    let (top_students, bottom_students) = rank_students(rows, &means, top_n);
    let top_classes = by_class
        .iter()
        .take(top_n)
        .enumerate()
        .map(|(index, group)| ClassRanking {
            rank: index + 1,
            class_id: group.key.clone(),
            class_code: group.label.clone(),
            average_grade: group.average_grade,
            student_count: group.student_count,
            pass_rate: group.pass_rate,
        })
        .collect();

    PerformanceReport {
        total_submissions: rows.len(),
        distinct_students: distinct_students.len(),
        graded_students,
        not_graded: distinct_students.len() - graded_students,
        pass_count,
        fail_count,
        pass_rate: percentage(pass_count, graded_students),
        average_grade: mean(&all_means).map(round2).unwrap_or(0.0),
        distribution,
        by_class,
        by_course,
        by_semester,
        by_lecturer,
        top_students,
        bottom_students,
        top_classes,
        submission_rate: percentage(rows.len(), distinct_students.len()),
        grading_completion_rate: percentage(graded_students, rows.len()),
        skipped_submissions: 0,
        skipped_classes: 0,
        skipped_assessments: 0,
    }
}

fn rank_students(
    rows: &[GradedSubmission],
    means: &BTreeMap<&str, f64>,
    top_n: usize,
) -> (Vec<StudentRanking>, Vec<StudentRanking>) {
    let mut names: BTreeMap<&str, &str> = BTreeMap::new();
    let mut graded_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for row in rows {
        if let Some(name) = row.student_name.as_deref() {
            names.entry(row.student_id.as_str()).or_insert(name);
        }
        if row.grade10.is_some() {
            *graded_counts.entry(row.student_id.as_str()).or_default() += 1;
        }
    }

    let mut ordered: Vec<(&str, f64)> = means.iter().map(|(id, grade)| (*id, *grade)).collect();
    ordered.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let to_ranking = |rank: usize, (student_id, grade): (&str, f64)| StudentRanking {
        rank,
        student_id: student_id.to_string(),
        student_name: names.get(student_id).map(|name| name.to_string()),
        average_grade: round2(grade),
        graded_submissions: graded_counts.get(student_id).copied().unwrap_or(0),
    };

    let top = ordered
        .iter()
        .take(top_n)
        .enumerate()
        .map(|(index, entry)| to_ranking(index + 1, *entry))
        .collect();
    let total = ordered.len();
    let bottom = ordered
        .iter()
        .rev()
        .take(top_n)
        .enumerate()
        .map(|(index, entry)| to_ranking(total - index, *entry))
        .collect();

    (top, bottom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(submission: &str, student: &str, class: &str, grade: Option<f64>) -> GradedSubmission {
        GradedSubmission {
            submission_id: submission.to_string(),
            student_id: student.to_string(),
            student_name: Some(format!("Student {student}")),
            class_id: class.to_string(),
            class_code: Some(class.to_uppercase()),
            course_id: "prn211".to_string(),
            course_name: None,
            semester_id: "fa25".to_string(),
            semester_code: Some("FA25".to_string()),
            lecturer_id: Some(format!("lecturer-{class}")),
            grade10: grade,
        }
    }

    #[test]
    fn band_boundaries_are_inclusive_below() {
        assert_eq!(GradeBand::from_grade(3.99), GradeBand::F);
        assert_eq!(GradeBand::from_grade(4.0), GradeBand::D);
        assert_eq!(GradeBand::from_grade(5.5), GradeBand::C);
        assert_eq!(GradeBand::from_grade(7.0), GradeBand::B);
        assert_eq!(GradeBand::from_grade(8.5), GradeBand::A);
        assert_eq!(GradeBand::from_grade(10.0), GradeBand::A);
    }

    #[test]
    fn classifies_on_student_mean_not_submission() {
        let rows = vec![
            row("s1", "alice", "c1", Some(9.0)),
            row("s2", "alice", "c1", Some(2.0)),
            row("s3", "bob", "c1", Some(4.0)),
        ];

        let report = aggregate(&rows);

        assert_eq!(report.pass_count, 1);
        assert_eq!(report.fail_count, 1);
        assert_eq!(report.distribution.count(GradeBand::C), 1);
        assert_eq!(report.distribution.count(GradeBand::D), 1);
        assert_eq!(report.top_students[0].student_id, "alice");
        assert_eq!(report.top_students[0].graded_submissions, 2);
    }

    #[test]
    fn not_graded_students_stay_out_of_pass_rate() {
        let rows = vec![
            row("s1", "alice", "c1", Some(6.0)),
            row("s2", "bob", "c1", None),
            row("s3", "carol", "c2", None),
        ];

        let report = aggregate(&rows);

        assert_eq!(report.graded_students, 1);
        assert_eq!(report.not_graded, 2);
        assert_eq!(report.pass_rate, 100.0);
        assert_eq!(report.grading_completion_rate, 33.33);
        assert_eq!(report.submission_rate, 100.0);
        assert_eq!(report.by_class.len(), 1);
    }

    #[test]
    fn groups_sort_by_average_descending() {
        let rows = vec![
            row("s1", "alice", "c1", Some(4.0)),
            row("s2", "bob", "c2", Some(9.0)),
            row("s3", "carol", "c2", Some(7.0)),
        ];

        let report = aggregate(&rows);

        assert_eq!(report.by_class[0].key, "c2");
        assert_eq!(report.by_class[0].average_grade, 8.0);
        assert_eq!(report.by_class[0].pass_rate, 100.0);
        assert_eq!(report.by_class[1].fail_count, 1);
        assert_eq!(report.top_classes[0].class_code.as_deref(), Some("C2"));
        assert_eq!(report.by_course.len(), 1);
        assert_eq!(report.by_course[0].student_count, 3);
        assert_eq!(report.by_lecturer.len(), 2);
    }

    #[test]
    fn rankings_respect_top_n() {
        let rows: Vec<GradedSubmission> = (0..5)
            .map(|i| row(&format!("s{i}"), &format!("st{i}"), "c1", Some(i as f64 * 2.0)))
            .collect();

        let report = aggregate_with_top_n(&rows, 2);

        assert_eq!(report.top_students.len(), 2);
        assert_eq!(report.top_students[0].student_id, "st4");
        assert_eq!(report.bottom_students[0].student_id, "st0");
        assert_eq!(report.bottom_students[0].rank, 5);
    }

    #[test]
    fn empty_input_yields_zeroes() {
        let report = aggregate(&[]);
        assert_eq!(report.pass_rate, 0.0);
        assert_eq!(report.submission_rate, 0.0);
        assert_eq!(report.grading_completion_rate, 0.0);
        assert!(report.top_students.is_empty());
    }
}
