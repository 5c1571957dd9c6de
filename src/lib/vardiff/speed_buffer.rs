/// Whether the buffer has wrapped around yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Filling,
    Full,
}

/// Fixed capacity ring of share intervals, in seconds.
///
/// While filling, the average covers only the entries appended so far. Once full, every append
/// overwrites the oldest entry and the average covers the whole window.
#[derive(Debug, Clone)]
pub struct SpeedBuffer {
    data: Vec<u64>,
    capacity: usize,
    cursor: usize,
    phase: Phase,
}

impl SpeedBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
            phase: Phase::Filling,
        }
    }

    pub fn append(&mut self, interval: u64) {
        match self.phase {
            Phase::Filling => {
                self.data.push(interval);
                self.cursor += 1;
                if self.data.len() == self.capacity {
                    self.cursor = 0;
                    self.phase = Phase::Full;
                }
            }
            Phase::Full => {
                self.data[self.cursor] = interval;
                self.cursor = (self.cursor + 1) % self.capacity;
            }
        }
    }

    pub fn average(&self) -> f64 {
        let sum: u64 = self.data.iter().sum();
        sum as f64 / self.size().max(1) as f64
    }

    /// Number of entries the average is computed over.
    pub fn size(&self) -> usize {
        match self.phase {
            Phase::Filling => self.cursor,
            Phase::Full => self.capacity,
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.cursor = 0;
        self.phase = Phase::Filling;
    }
}
