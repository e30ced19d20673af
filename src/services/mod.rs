pub mod aggregation;
pub(crate) mod errors;
pub(crate) mod grade_saving;
pub(crate) mod grading_context;
pub mod reconciliation;
pub mod session_selection;
pub(crate) mod statistics;
pub(crate) mod template_resolution;
