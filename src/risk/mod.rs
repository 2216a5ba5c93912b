// Position sizing
pub mod sizer;

pub use sizer::RiskSizer;
