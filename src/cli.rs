use anyhow::{anyhow, Result};

use crate::services::statistics::StatisticsScope;

pub(crate) const USAGE: &str = "usage: gradeboard-report [--semester ID] [--course ID] \
[--class ID] [--lecturer ID] [--top N] [--concurrency N] [--pretty]";

#[derive(Debug, Default)]
pub(crate) struct ReportArgs {
    pub(crate) scope: StatisticsScope,
    pub(crate) top_n: Option<usize>,
    pub(crate) concurrency: Option<usize>,
    pub(crate) pretty: bool,
}

pub(crate) fn parse_args(args: impl IntoIterator<Item = String>) -> Result<ReportArgs> {
    let mut parsed = ReportArgs::default();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let mut value = |name: &str| args.next().ok_or_else(|| anyhow!("{name} missing value"));
        match arg.as_str() {
            "--semester" => parsed.scope.semester_id = Some(value("--semester")?),
            "--course" => parsed.scope.course_id = Some(value("--course")?),
            "--class" => parsed.scope.class_id = Some(value("--class")?),
            "--lecturer" => parsed.scope.lecturer_id = Some(value("--lecturer")?),
            "--top" => parsed.top_n = Some(parse_positive("--top", &value("--top")?)?),
            "--concurrency" => {
                parsed.concurrency =
                    Some(parse_positive("--concurrency", &value("--concurrency")?)?);
            }
            "--pretty" => parsed.pretty = true,
            "-h" | "--help" => return Err(anyhow!(USAGE)),
            _ => return Err(anyhow!("Unknown argument: {arg}\n{USAGE}")),
        }
    }

    Ok(parsed)
}

fn parse_positive(name: &str, raw: &str) -> Result<usize> {
    match raw.parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(anyhow!("{name} must be a positive integer, got {raw:?}")),
    }
}
