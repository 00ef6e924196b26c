// =============================================================================
// Detection Engines — dispatch contract shared by all seven engines + ML
// =============================================================================
//
// Each engine owns only its own private state (no shared mutable globals,
// mirroring the constructor-injected collaborators the teacher's `AppState`
// wires together rather than reaching for module-level singletons) and is
// called synchronously, in the fixed order the dispatcher enforces, so every
// engine observes a fully-committed view of the current tick.
// =============================================================================

pub mod cross_triangular;
pub mod dex_cex;
pub mod futures_spot;
pub mod latency;
pub mod ml;
pub mod simple_cross;
pub mod statistical;
pub mod triangular;

use crate::bus::BusEvent;
use crate::config::RuntimeConfig;
use crate::market_state::MarketStateStore;
use crate::tick_ring::TickRingStore;
use crate::types::PriceUpdate;

/// Everything an engine may read. Writes to the Market State Store and Tick
/// Buffer Ring have already happened by the time the dispatcher hands this
/// out — engines only ever take consistent read-only snapshots.
pub struct EngineContext<'a> {
    pub market: &'a MarketStateStore,
    pub ticks: &'a TickRingStore,
    pub config: &'a RuntimeConfig,
}

pub trait Engine: Send {
    fn name(&self) -> &'static str;

    /// Evaluate the engine against the tick just committed. Implementations
    /// never panic on bad input (the dispatcher also wraps the call in
    /// `catch_unwind` as a second line of defense) and never perform
    /// blocking I/O.
    fn on_tick(&mut self, ctx: &EngineContext<'_>, tick: &PriceUpdate) -> Vec<BusEvent>;
}

pub use cross_triangular::CrossTriangularEngine;
pub use dex_cex::DexCexEngine;
pub use futures_spot::FuturesSpotEngine;
pub use latency::LatencyEngine;
pub use ml::MlEngine;
pub use simple_cross::SimpleCrossEngine;
pub use statistical::StatisticalArbitrageEngine;
pub use triangular::TriangularEngine;
