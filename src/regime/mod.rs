// Market regime filter for BUY signals
pub mod filter;

pub use filter::{MarketRegime, MarketRegimeFilter, DEFAULT_REGIME_MARGIN};
