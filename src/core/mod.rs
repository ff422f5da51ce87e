pub mod divergence;
pub mod engine;
pub mod indicators;
pub mod swings;
pub mod trend;

pub use divergence::DivergenceDetector;
pub use engine::{ConsolidatedView, IndicatorEngine, IndicatorSeries};
pub use trend::TrendAnalyzer;
