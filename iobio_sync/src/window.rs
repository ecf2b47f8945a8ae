use crate::SyncError;

/// Number of credits granted when a session opens its feed.
pub const DEFAULT_WINDOW: u32 = 10;

/// Book-keeping for the pull-based flow control of a delta feed.
///
/// The consumer grants credits, the producer spends one per record. The
/// window never lets more than `capacity` records be outstanding.
#[derive(Debug, Clone)]
pub struct CreditWindow {
    capacity: u32,
    outstanding: u32,
    granted_total: u64,
    received_total: u64,
}

impl CreditWindow {
    /// Creates an empty window; nothing is granted yet.
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity: capacity.max(1),
            outstanding: 0,
            granted_total: 0,
            received_total: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Credits granted to the producer that it has not spent yet.
    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    pub fn granted_total(&self) -> u64 {
        self.granted_total
    }

    pub fn received_total(&self) -> u64 {
        self.received_total
    }

    /// How many credits can be granted without exceeding the capacity.
    pub fn headroom(&self) -> u32 {
        self.capacity - self.outstanding
    }

    /// Records credits handed to the producer, clamped to the headroom.
    /// Returns the number actually granted.
    pub fn grant(&mut self, credits: u32) -> u32 {
        let credits = credits.min(self.headroom());
        self.outstanding += credits;
        self.granted_total += u64::from(credits);
        credits
    }

    /// Records one received record, spending a credit.
    pub fn receive(&mut self) -> Result<(), SyncError> {
        if self.outstanding == 0 {
            return Err(SyncError::CreditOverrun);
        }
        self.outstanding -= 1;
        self.received_total += 1;
        Ok(())
    }
}
