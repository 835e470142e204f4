use crate::types::{RunContext, RUN_ID_LABEL};
use std::collections::BTreeMap;
use std::time::Duration;

/// Converts a duration to whole seconds, rounding any sub-second remainder up.
pub fn whole_seconds(duration: Duration) -> u64 {
    let seconds = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        seconds + 1
    } else {
        seconds
    }
}

/// Labels applied to every resource created for `run`.
pub fn run_labels(run: &RunContext) -> BTreeMap<String, String> {
    BTreeMap::from([(RUN_ID_LABEL.to_string(), run.id.clone())])
}
