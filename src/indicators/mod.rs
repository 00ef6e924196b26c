// =============================================================================
// Technical indicators feeding the ML feature vector
// =============================================================================
//
// Pure functions over a mid-price series pulled from the Tick Buffer Ring.
// Every indicator returns `Option`/empty-`Vec` on insufficient history rather
// than panicking, since `engines::ml` calls these on every tick once the
// warm-up threshold is met and must tolerate short series gracefully.
// =============================================================================

pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod roc;
pub mod rsi;
