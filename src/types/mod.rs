//! Value types used for parameter binding.

pub mod decimal;

pub use decimal::SqlDecimal;
