pub mod decode;
pub mod error;
pub mod instructions;
pub mod price_calcs;
pub mod retry;
pub mod tick_math;
