pub mod job_model;
pub mod pool_model;
pub mod positions_model;
pub mod quote_model;
pub mod wallet_model;
