// Trading signals from stage transitions
pub mod breakout;
pub mod generator;

pub use breakout::{validate_breakout, BreakoutCheck, BreakoutConfig, BreakoutValidator};
pub use generator::{classify_transition, SignalGenerator, SignalView};
