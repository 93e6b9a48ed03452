//! Event delivery filter
//!
//! Decides whether a decoded event reaches the consumer. Row and query
//! events are scoped to the replicated database; the event-kind allow-list
//! only applies to the remaining kinds.

use std::collections::HashSet;

use super::decoder::{BinlogEvent, EventKind};

/// Pure delivery decision for one decoded event.
///
/// With no `target_schema` every schema matches.
pub fn should_emit(
    event: &BinlogEvent,
    target_schema: Option<&str>,
    allow_list: Option<&HashSet<EventKind>>,
) -> bool {
    match event {
        BinlogEvent::WriteRows(_)
        | BinlogEvent::UpdateRows(_)
        | BinlogEvent::DeleteRows(_)
        | BinlogEvent::Query(_) => {
            target_schema.map_or(true, |target| event.schema() == target)
        }
        BinlogEvent::TableMap(_) => {
            allow_list.map_or(true, |allowed| allowed.contains(&event.kind()))
        }
    }
}
