use crate::tag_array;

/// Side effects of one cache access, observable by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ReadRequestSent,
    WriteBackRequestSent {
        evicted_block: tag_array::EvictedBlock,
    },
    PrefetchRequestSent,
}

#[must_use]
pub fn was_read_sent(events: &[Event]) -> bool {
    events
        .iter()
        .any(|event| matches!(event, Event::ReadRequestSent))
}

#[must_use]
pub fn was_prefetch_sent(events: &[Event]) -> bool {
    events
        .iter()
        .any(|event| matches!(event, Event::PrefetchRequestSent))
}

#[must_use]
pub fn was_writeback_sent(events: &[Event]) -> Option<&tag_array::EvictedBlock> {
    events.iter().find_map(|event| match event {
        Event::WriteBackRequestSent { evicted_block } => Some(evicted_block),
        _ => None,
    })
}
