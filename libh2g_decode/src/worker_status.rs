/// What a worker is currently doing with its run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RunPhase {
    /// Frames are being decoded and aligned
    #[default]
    Decoding,
    /// The run finished cleanly
    Done,
    /// The run terminated on the stall threshold
    Stalled,
}

/// Progress message sent from a worker thread to the UI.
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub worker_id: usize,
    pub run_number: i32,
    /// Fraction of the run file consumed, 0.0 to 1.0
    pub progress: f32,
    pub phase: RunPhase,
}

impl WorkerStatus {
    pub fn new(worker_id: usize, run_number: i32, progress: f32, phase: RunPhase) -> Self {
        Self {
            worker_id,
            run_number,
            progress,
            phase,
        }
    }
}
