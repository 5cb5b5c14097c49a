use std::collections::VecDeque;
use std::sync::Arc;

use super::clipboard::ClipBoard;
use super::config::SourceConfig;
use super::data_loader::DataLoader;
use super::error::ReconstructorError;
use super::event::Event;
use super::event_data::EventData;
use super::fe_bookie::FeBookie;

#[derive(Debug)]
struct SourceSlot {
    clipboard: Arc<ClipBoard<EventData>>,
    /// Events received but not yet emitted, because some other source has fewer
    leftover: VecDeque<Event>,
    /// bcid found at the sync point of the last synchronize()
    reference_bcid: Option<u16>,
}

impl SourceSlot {
    fn new(clipboard: Arc<ClipBoard<EventData>>) -> Self {
        Self {
            clipboard,
            leftover: VecDeque::new(),
            reference_bcid: None,
        }
    }
}

/// Merges the event streams of several front ends into aligned batches.
///
/// Each call to [`EventReconstructor::get_events`] takes at most one batch from every source and
/// emits as many events per source as the most-behind source can supply. Whatever the other
/// sources have beyond that waits in their leftover buffers for the next call.
///
/// The l1id/bcid counters of the front ends are local to each one, so when a trigger
/// multiplier is set the emitted events are re-stamped from a shared counter instead: the
/// i-th emitted event of every source gets the same l1id and bcid, the l1id advances once per
/// aligned event, and the bcid advances once every `trigger_multiplier` l1ids.
///
/// With the multiplier at 0 (disabled) events are still aligned by position but keep the ids
/// their front end gave them.
///
/// The reconstructor never blocks and does not run a thread of its own; the caller drives it.
#[derive(Debug, Default)]
pub struct EventReconstructor {
    slots: Vec<Option<SourceSlot>>,
    l1id: u16,
    bcid: u16,
    triggers_in_bcid: u32,
    trigger_multiplier: u32,
}

impl EventReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reconstructor with re-numbering enabled from the start
    pub fn with_trigger_multiplier(trigger_multiplier: u32) -> Self {
        Self {
            trigger_multiplier,
            ..Self::default()
        }
    }

    /// Wire a loader's output to slot fe_id.
    ///
    /// A `trigger_multiplier` in the config enables re-numbering with that multiplier.
    pub fn configure(
        &mut self,
        loader: &mut dyn DataLoader,
        fe_id: usize,
        config: &SourceConfig,
    ) -> Result<(), ReconstructorError> {
        let clipboard = Arc::new(ClipBoard::new());
        self.connect_clipboard(fe_id, clipboard.clone())?;
        loader.connect(clipboard);
        if let Some(mult) = config.trigger_multiplier {
            self.set_trigger_multiplier(mult);
        }
        log::info!(
            "EventReconstructor slot {fe_id} reads from {} ({})",
            FeBookie::display(fe_id as u32),
            loader.name()
        );
        Ok(())
    }

    /// Read slot fe_id from an existing ClipBoard
    pub fn connect_clipboard(
        &mut self,
        fe_id: usize,
        clipboard: Arc<ClipBoard<EventData>>,
    ) -> Result<(), ReconstructorError> {
        if self.slots.len() <= fe_id {
            self.slots.resize_with(fe_id + 1, || None);
        }
        if self.slots[fe_id].is_some() {
            return Err(ReconstructorError::SlotTaken(fe_id));
        }
        self.slots[fe_id] = Some(SourceSlot::new(clipboard));
        Ok(())
    }

    pub fn set_trigger_multiplier(&mut self, trigger_multiplier: u32) {
        self.trigger_multiplier = trigger_multiplier;
    }

    pub fn trigger_multiplier(&self) -> u32 {
        self.trigger_multiplier
    }

    pub fn is_renumbering(&self) -> bool {
        self.trigger_multiplier > 0
    }

    /// Number of connected sources
    pub fn num_sources(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Size of the output matrix (highest slot + 1)
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn clipboard(&self, fe_id: usize) -> Option<Arc<ClipBoard<EventData>>> {
        self.slot(fe_id).map(|s| s.clipboard.clone())
    }

    pub fn leftover_len(&self, fe_id: usize) -> usize {
        self.slot(fe_id).map_or(0, |s| s.leftover.len())
    }

    pub fn reference_bcid(&self, fe_id: usize) -> Option<u16> {
        self.slot(fe_id).and_then(|s| s.reference_bcid)
    }

    /// The l1id and bcid the next re-numbered event will get
    pub fn next_trigger_id(&self) -> (u16, u16) {
        (self.l1id, self.bcid)
    }

    /// True when no source has anything queued or left over
    pub fn is_drained(&self) -> bool {
        self.slots
            .iter()
            .flatten()
            .all(|s| s.leftover.is_empty() && s.clipboard.empty())
    }

    fn slot(&self, fe_id: usize) -> Option<&SourceSlot> {
        self.slots.get(fe_id).and_then(|s| s.as_ref())
    }

    /// Move one batch from the slot's ClipBoard into its leftover buffer.
    ///
    /// A batch with invalid l1ids turns re-numbering on if it was off.
    fn take_batch(slot: &mut SourceSlot, fe_id: usize, trigger_multiplier: &mut u32) -> bool {
        let Some(batch) = slot.clipboard.pop_data() else {
            return false;
        };
        if batch.has_invalid_l1id() && *trigger_multiplier == 0 {
            log::warn!(
                "{} delivered invalid l1ids at {:?}; enabling re-numbering with multiplier 1",
                FeBookie::display(fe_id as u32),
                batch.invalid_l1id_indices()
            );
            *trigger_multiplier = 1;
        }
        slot.leftover.extend(batch.into_events());
        true
    }

    /// Advance the shared counters by count events, returning the ids handed out
    fn next_trigger_ids(&mut self, count: usize) -> Vec<(u16, u16)> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push((self.l1id, self.bcid));
            self.l1id = self.l1id.wrapping_add(1);
            self.triggers_in_bcid += 1;
            if self.triggers_in_bcid >= self.trigger_multiplier {
                self.triggers_in_bcid = 0;
                self.bcid = self.bcid.wrapping_add(1);
            }
        }
        ids
    }

    /// Pull one batch per source and return the events every source can currently supply.
    ///
    /// The result has one entry per slot; every connected slot gets the same number of events.
    /// If any connected source has nothing buffered, every entry is empty.
    pub fn get_events(&mut self) -> Vec<Vec<Event>> {
        let mut trigger_multiplier = self.trigger_multiplier;
        for (fe_id, slot) in self.slots.iter_mut().enumerate() {
            if let Some(slot) = slot {
                Self::take_batch(slot, fe_id, &mut trigger_multiplier);
            }
        }
        self.trigger_multiplier = trigger_multiplier;

        let num_to_send = self
            .slots
            .iter()
            .flatten()
            .map(|s| s.leftover.len())
            .min()
            .unwrap_or(0);

        let ids = if self.is_renumbering() {
            self.next_trigger_ids(num_to_send)
        } else {
            Vec::new()
        };

        self.slots
            .iter_mut()
            .map(|slot| match slot {
                Some(slot) => {
                    let mut events: Vec<Event> = slot.leftover.drain(..num_to_send).collect();
                    for (event, (l1id, bcid)) in events.iter_mut().zip(&ids) {
                        event.l1id = *l1id;
                        event.bcid = *bcid;
                    }
                    events
                }
                None => Vec::new(),
            })
            .collect()
    }

    /// Flush every source up to a common sync point.
    ///
    /// Batches are pulled until each source holds more than `index` events. The bcid of the
    /// event at `index` becomes that source's reference bcid and the `index` events before it
    /// are returned, untouched. If some source cannot reach the sync point yet nothing is
    /// flushed and `None` is returned; the pulled batches stay buffered.
    pub fn synchronize(&mut self, index: usize) -> Option<Vec<Vec<Event>>> {
        let mut trigger_multiplier = self.trigger_multiplier;
        let mut ready = true;
        for (fe_id, slot) in self.slots.iter_mut().enumerate() {
            if let Some(slot) = slot {
                while slot.leftover.len() <= index {
                    if !Self::take_batch(slot, fe_id, &mut trigger_multiplier) {
                        break;
                    }
                }
                ready &= slot.leftover.len() > index;
            }
        }
        self.trigger_multiplier = trigger_multiplier;
        if !ready || self.num_sources() == 0 {
            return None;
        }

        Some(
            self.slots
                .iter_mut()
                .map(|slot| match slot {
                    Some(slot) => {
                        slot.reference_bcid = slot.leftover.get(index).map(|e| e.bcid);
                        slot.leftover.drain(..index).collect()
                    }
                    None => Vec::new(),
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::INVALID_L1ID;
    use crate::file_loader::FileDataLoader;

    fn batch(tags: std::ops::Range<u32>) -> EventData {
        tags.map(|t| Event::new(t, 1000 + t as u16, 2000 + t as u16))
            .collect::<Vec<_>>()
            .into()
    }

    type Source = Arc<ClipBoard<EventData>>;

    fn two_sources(mult: u32) -> (EventReconstructor, Source, Source) {
        let mut evr = EventReconstructor::with_trigger_multiplier(mult);
        let a = Arc::new(ClipBoard::new());
        let b = Arc::new(ClipBoard::new());
        evr.connect_clipboard(0, a.clone()).unwrap();
        evr.connect_clipboard(1, b.clone()).unwrap();
        (evr, a, b)
    }

    fn ids(events: &[Event]) -> Vec<(u16, u16)> {
        events.iter().map(|e| (e.l1id, e.bcid)).collect()
    }

    #[test]
    fn test_alignment_across_calls() {
        let (mut evr, a, b) = two_sources(1);
        a.push_data(batch(0..5));
        a.push_data(batch(5..8));
        b.push_data(batch(100..102));
        b.push_data(batch(102..108));

        let first = evr.get_events();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].len(), 2);
        assert_eq!(first[1].len(), 2);
        assert_eq!(ids(&first[0]), vec![(0, 0), (1, 1)]);
        assert_eq!(ids(&first[1]), vec![(0, 0), (1, 1)]);
        assert_eq!(first[0][0].tag, 0);
        assert_eq!(first[1][0].tag, 100);
        assert_eq!(evr.leftover_len(0), 3);
        assert_eq!(evr.leftover_len(1), 0);

        let second = evr.get_events();
        assert_eq!(second[0].len(), 6);
        assert_eq!(second[1].len(), 6);
        let expected: Vec<(u16, u16)> = (2..8).map(|i| (i, i)).collect();
        assert_eq!(ids(&second[0]), expected);
        assert_eq!(ids(&second[1]), expected);
        assert_eq!(
            second[0].iter().map(|e| e.tag).collect::<Vec<_>>(),
            vec![2, 3, 4, 5, 6, 7]
        );
        assert!(evr.is_drained());
    }

    #[test]
    fn test_multiplier_rolls_into_bcid() {
        let (mut evr, a, b) = two_sources(4);
        a.push_data(batch(0..10));
        b.push_data(batch(0..10));
        let events = evr.get_events();
        let bcids: Vec<u16> = events[0].iter().map(|e| e.bcid).collect();
        assert_eq!(bcids, vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2]);
        assert_eq!(events[1].last().map(|e| e.l1id), Some(9));
        assert_eq!(evr.next_trigger_id(), (10, 2));
    }

    #[test]
    fn test_slowest_source_gates() {
        let (mut evr, a, _b) = two_sources(1);
        a.push_data(batch(0..4));
        let events = evr.get_events();
        assert!(events.iter().all(|e| e.is_empty()));
        assert_eq!(evr.leftover_len(0), 4);
        assert_eq!(evr.next_trigger_id(), (0, 0));
        assert!(!evr.is_drained());
    }

    #[test]
    fn test_invalid_l1id_enables_renumbering() {
        let (mut evr, a, b) = two_sources(0);
        assert!(!evr.is_renumbering());
        let mut bad = EventData::new();
        bad.add_event(Event::new(0, INVALID_L1ID, 77));
        a.push_data(bad);
        b.push_data(batch(0..1));

        let events = evr.get_events();
        assert_eq!(evr.trigger_multiplier(), 1);
        assert_eq!(ids(&events[0]), vec![(0, 0)]);
        assert_eq!(ids(&events[1]), vec![(0, 0)]);
    }

    #[test]
    fn test_disabled_keeps_local_ids() {
        let (mut evr, a, b) = two_sources(0);
        a.push_data(batch(0..3));
        b.push_data(batch(10..12));
        let events = evr.get_events();
        assert_eq!(events[0].len(), 2);
        assert_eq!(ids(&events[0]), vec![(1000, 2000), (1001, 2001)]);
        assert_eq!(ids(&events[1]), vec![(1010, 2010), (1011, 2011)]);
        assert_eq!(evr.leftover_len(0), 1);
    }

    #[test]
    fn test_synchronize() {
        let (mut evr, a, b) = two_sources(0);
        a.push_data(batch(0..2));
        a.push_data(batch(2..6));
        b.push_data(batch(10..14));

        let flushed = evr.synchronize(3).unwrap();
        assert_eq!(flushed[0].iter().map(|e| e.tag).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(flushed[1].iter().map(|e| e.tag).collect::<Vec<_>>(), vec![10, 11, 12]);
        assert_eq!(evr.reference_bcid(0), Some(2003));
        assert_eq!(evr.reference_bcid(1), Some(2013));
        assert_eq!(evr.leftover_len(0), 3);
        assert_eq!(evr.leftover_len(1), 1);
    }

    #[test]
    fn test_synchronize_waits_for_all_sources() {
        let (mut evr, a, b) = two_sources(0);
        a.push_data(batch(0..10));
        b.push_data(batch(0..2));
        assert!(evr.synchronize(5).is_none());
        assert_eq!(evr.leftover_len(0), 10);
        assert_eq!(evr.leftover_len(1), 2);
        assert_eq!(evr.reference_bcid(0), None);

        b.push_data(batch(2..8));
        let flushed = evr.synchronize(5).unwrap();
        assert_eq!(flushed[0].len(), 5);
        assert_eq!(flushed[1].len(), 5);
    }

    #[test]
    fn test_configure_connects_loader() {
        let mut evr = EventReconstructor::new();
        let mut loader = FileDataLoader::new();
        let mut config = SourceConfig::named("fe0");
        config.path = Some(std::path::PathBuf::from("/nonexistent/fe0_data.raw"));
        config.trigger_multiplier = Some(16);
        loader.configure(&config).unwrap();

        evr.configure(&mut loader, 2, &config).unwrap();
        assert_eq!(evr.trigger_multiplier(), 16);
        assert_eq!(evr.num_sources(), 1);
        assert_eq!(evr.num_slots(), 3);
        assert!(evr.clipboard(2).is_some());
        assert!(evr.clipboard(0).is_none());
        assert!(matches!(
            evr.configure(&mut loader, 2, &config),
            Err(ReconstructorError::SlotTaken(2))
        ));

        // unconnected slots do not hold back the connected one
        evr.clipboard(2).unwrap().push_data(batch(0..3));
        let events = evr.get_events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].len(), 3);
        assert!(events[0].is_empty());
    }
}
