pub mod binance_api;
pub mod bybit_api;
pub mod evm_api;
pub mod exchange_api;
pub mod jupiter_api;
pub mod lifi_api;
pub mod orca_api;
pub mod rpc_api;
