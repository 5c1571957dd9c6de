/// Modulus of the job id counter. Ids roll back to 1 when the counter reaches a multiple of it.
pub const JOB_ID_MODULUS: u32 = 0xffff;

/// Generator of short hex job ids handed to miners.
///
/// Ids only need to be unique among the jobs a miner may still hold: every new block sends
/// `clean_jobs`, so wrapping around is harmless. `"0"` is never produced.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct JobIdFactory {
    state: u32,
}

impl JobIdFactory {
    pub fn new() -> Self {
        Self { state: 0 }
    }

    /// Increments then returns the internal state as lowercase hex.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> String {
        self.state += 1;
        if self.state % JOB_ID_MODULUS == 0 {
            self.state = 1;
        }
        format!("{:x}", self.state)
    }
}
