//! Trace collapse.
//!
//! The raw pipeline trail interleaves pass-level `Complete` records with
//! intermediate events (errors, truncations) the passes emitted along the
//! way, plus Start/Loaded/Finished bookkeeping. Clients only want the
//! `Complete` spine, so this folds the trail: bookkeeping is dropped and
//! each run of intermediate events is flushed into the *next* `Complete`'s
//! data as `internal_logs`.

use contextfabric_core::message::TraceEvent;
use serde_json::{json, Value};

/// Actions that are pure bookkeeping and never forwarded.
const FILTERED_ACTIONS: [&str; 3] = ["Start", "Finished", "Loaded"];

/// Collapse a raw pipeline trace into its `Complete` spine.
pub fn collapse_traces(traces: &[TraceEvent]) -> Vec<TraceEvent> {
    let mut out = Vec::new();
    let mut buffered: Vec<Value> = Vec::new();

    for event in traces {
        if FILTERED_ACTIONS.contains(&event.action.as_str()) {
            continue;
        }
        if event.action == "Complete" {
            let mut complete = event.clone();
            if !buffered.is_empty() {
                let data = complete.data.get_or_insert_with(|| json!({}));
                if let Some(obj) = data.as_object_mut() {
                    obj.insert(
                        "internal_logs".into(),
                        Value::Array(std::mem::take(&mut buffered)),
                    );
                } else {
                    buffered.clear();
                }
            }
            out.push(complete);
        } else {
            buffered.push(serde_json::to_value(event).unwrap_or(Value::Null));
        }
    }

    out
}
