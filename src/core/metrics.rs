use std::sync::OnceLock;

use metrics::Unit;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    if PROM_HANDLE.get().is_none() {
        let handle = PrometheusBuilder::new().install_recorder()?;
        let _ = PROM_HANDLE.set(handle);
        describe();
    }
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    metrics::describe_counter!(
        "grading_poll_outcomes_total",
        "Auto-grading polls by final outcome (completed, failed, timeout, aborted)"
    );
    metrics::describe_histogram!(
        "grading_poll_duration_seconds",
        Unit::Seconds,
        "Time from poll start to its reported outcome"
    );
    metrics::describe_counter!("grade_saves_total", "Lecturer grade saves by result");
    metrics::describe_counter!(
        "statistics_submissions_skipped_total",
        "Submissions left out of a statistics crawl after a backend error"
    );
    metrics::describe_counter!(
        "statistics_batches_skipped_total",
        "Classes or class assessments left out of a statistics crawl, by kind"
    );
    metrics::describe_histogram!(
        "statistics_report_duration_seconds",
        Unit::Seconds,
        "Wall time of a full statistics crawl and aggregation"
    );
    metrics::describe_counter!("http_requests_total", "HTTP responses by status code");
}
