pub mod bridge_service;
pub mod liquidity_service;
pub mod monitor_service;
pub mod pipeline_service;
pub mod swap_service;
pub mod wallet_service;
pub mod withdrawal_service;
