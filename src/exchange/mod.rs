mod traits;

pub use traits::{ChannelType, ExchangeGateway};

#[cfg(test)]
pub use traits::MockExchangeGateway;
