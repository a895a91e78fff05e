//! Playback timing: clocks, a deterministic timer queue and the frame
//! playback state machine.

pub mod clock;
pub mod engine;
pub mod timers;

pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use engine::{PlaybackEngine, PlaybackState, PlaybackStatus, SpeedPreset};
pub use timers::{TimerId, TimerQueue};
