pub mod coinbase_rest;
pub mod coinbase_ws;

pub use coinbase_rest::CoinbaseClient;
pub use coinbase_ws::{CoinbaseWebSocket, CoinbaseWsConfig};
