use bit_set::BitSet;

use super::event::Event;

/// A batch of events decoded by a single DataLoader, moved as one unit through a ClipBoard.
///
/// Alongside the events the batch keeps track of two data-quality signals:
///
/// - desync: an event whose bcid is neither equal to nor one greater than the bcid of the
///   event before it
/// - invalid l1id: an event carrying the sentinel l1id (see [`crate::constants::INVALID_L1ID`])
///
/// Both are recorded as the set of offending indices. The flags are true exactly when the
/// corresponding set is non-empty, so removing the last event rolls them back for free.
#[derive(Debug, Default)]
pub struct EventData {
    events: Vec<Event>,
    desync_indices: BitSet,
    invalid_l1id_indices: BitSet,
}

impl EventData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, flagging it if it breaks the bcid sequence or has an invalid l1id
    pub fn add_event(&mut self, event: Event) {
        let index = self.events.len();
        if let Some(prev) = self.events.last() {
            if event.bcid != prev.bcid && event.bcid != prev.bcid.wrapping_add(1) {
                log::debug!(
                    "Desync at event {index}: bcid {} follows {}",
                    event.bcid,
                    prev.bcid
                );
                self.desync_indices.insert(index);
            }
        }
        if event.has_invalid_l1id() {
            self.invalid_l1id_indices.insert(index);
        }
        self.events.push(event);
    }

    /// Remove the most recently added event, undoing any flags it raised
    pub fn remove_last_event(&mut self) -> Option<Event> {
        let event = self.events.pop()?;
        let index = self.events.len();
        self.desync_indices.remove(index);
        self.invalid_l1id_indices.remove(index);
        Some(event)
    }

    /// Mutable access to the last event, used while its hits are still being decoded
    pub fn last_event_mut(&mut self) -> Option<&mut Event> {
        self.events.last_mut()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    pub fn size(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn total_hits(&self) -> u64 {
        self.events.iter().map(|e| e.n_hits() as u64).sum()
    }

    pub fn has_desync_events(&self) -> bool {
        !self.desync_indices.is_empty()
    }

    pub fn desync_indices(&self) -> Vec<usize> {
        self.desync_indices.iter().collect()
    }

    pub fn has_invalid_l1id(&self) -> bool {
        !self.invalid_l1id_indices.is_empty()
    }

    pub fn invalid_l1id_indices(&self) -> Vec<usize> {
        self.invalid_l1id_indices.iter().collect()
    }
}

impl From<Vec<Event>> for EventData {
    fn from(events: Vec<Event>) -> Self {
        let mut data = Self::new();
        for event in events {
            data.add_event(event);
        }
        data
    }
}
