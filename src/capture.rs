//! Change capture: filter and flatten raw change events

use crate::config::TransformPolicy;
use crate::error::{PipelineError, Result};
use crate::types::{PersonRecord, RawChangeEvent};

/// Flatten the insert events of a change-stream batch into person records
///
/// Events other than inserts are dropped without error. An admitted
/// event with a missing or mistyped field aborts the batch under
/// [`TransformPolicy::Abort`] and is dropped with a warning under
/// [`TransformPolicy::Skip`].
pub fn capture(events: &[RawChangeEvent], policy: TransformPolicy) -> Result<Vec<PersonRecord>> {
    let mut records = Vec::with_capacity(events.len());

    for event in events.iter().filter(|event| event.is_insert()) {
        match flatten(event) {
            Ok(record) => records.push(record),
            Err(e) if policy == TransformPolicy::Skip => {
                tracing::warn!(
                    event_id = event.event_id.as_deref().unwrap_or("-"),
                    error = %e,
                    "Skipping malformed change event"
                );
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        events = events.len(),
        records = records.len(),
        "Change events captured"
    );

    Ok(records)
}

fn flatten(event: &RawChangeEvent) -> Result<PersonRecord> {
    let event_id = event.event_id.as_deref();
    let image = event
        .dynamodb
        .new_image
        .as_ref()
        .ok_or_else(|| PipelineError::transform(event_id, "NewImage", "insert event has no new image"))?;

    let record = PersonRecord::from_image(image, event_id)?;
    tracing::debug!(event_id = event_id.unwrap_or("-"), "Change event flattened");
    Ok(record)
}
