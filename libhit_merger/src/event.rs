use super::constants::INVALID_L1ID;
use super::error::EventError;

/// A single pixel activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hit {
    pub col: u16,
    pub row: u16,
    pub tot: u16,
}

impl Hit {
    pub fn new(col: u16, row: u16, tot: u16) -> Self {
        Self { col, row, tot }
    }
}

/// One trigger's worth of hits from a single front end.
///
/// The hit count written to disk (nHits) is always derived from the hit list, so the two can
/// never disagree. Adding hits past what nHits can represent is refused.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Event {
    pub tag: u32,
    pub l1id: u16,
    pub bcid: u16,
    hits: Vec<Hit>,
}

impl Event {
    /// Create an event with no hits
    pub fn new(tag: u32, l1id: u16, bcid: u16) -> Self {
        Self {
            tag,
            l1id,
            bcid,
            hits: Vec::new(),
        }
    }

    /// Create an event from a full hit list
    pub fn with_hits(tag: u32, l1id: u16, bcid: u16, hits: Vec<Hit>) -> Result<Self, EventError> {
        if hits.len() > u16::MAX as usize {
            return Err(EventError::TooManyHits(hits.len()));
        }
        Ok(Self {
            tag,
            l1id,
            bcid,
            hits,
        })
    }

    pub fn add_hit(&mut self, hit: Hit) -> Result<(), EventError> {
        if self.hits.len() >= u16::MAX as usize {
            return Err(EventError::TooManyHits(self.hits.len() + 1));
        }
        self.hits.push(hit);
        Ok(())
    }

    pub fn remove_hit(&mut self) -> Option<Hit> {
        self.hits.pop()
    }

    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    /// The persisted hit count
    pub fn n_hits(&self) -> u16 {
        // add_hit/with_hits guarantee this fits
        self.hits.len() as u16
    }

    pub fn has_invalid_l1id(&self) -> bool {
        self.l1id == INVALID_L1ID
    }
}
