pub(crate) mod polling;

pub(crate) use polling::{PollConfig, PollingController};
