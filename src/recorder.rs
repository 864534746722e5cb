// Recording of particle states along a transport.
use crate::event::Event;
use crate::particle::ParticleState;
use serde::{Deserialize, Serialize};

/// Receives snapshots of the transported state.
///
/// Frames are emitted at start, stop, medium changes, vertices when requested
/// by the configuration, and every `period()` steps when it is not 0.
pub trait Recorder {
    fn record(&mut self, state: &ParticleState, medium: Option<usize>, event: Event);

    fn period(&self) -> usize {
        0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub state: ParticleState,
    pub medium: Option<usize>,
    pub event: Event,
}

/// Recorder keeping every frame in memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameRecorder {
    pub period: usize,
    pub frames: Vec<Frame>,
}

impl FrameRecorder {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            frames: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(&self.frames)?)
    }
}

impl Recorder for FrameRecorder {
    fn record(&mut self, state: &ParticleState, medium: Option<usize>, event: Event) {
        self.frames.push(Frame {
            state: state.clone(),
            medium,
            event,
        });
    }

    fn period(&self) -> usize {
        self.period
    }
}
