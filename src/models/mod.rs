pub mod candle;
pub mod direction;
pub mod divergence;
pub mod recommendation;
pub mod signal;
pub mod snapshot;
pub mod timeframe;

pub use candle::{Candle, CandleSeries};
pub use direction::*;
pub use divergence::{Divergence, DivergenceStrength, DivergenceType, IndicatorKind};
pub use recommendation::{Action, Recommendation};
pub use signal::{Signal, SignalStatus, TakeProfit, ValidSignal};
pub use snapshot::{IndicatorSnapshot, MacdSignal, RsiStatus, VolatilityStatus};
pub use timeframe::Timeframe;
