pub mod order_listener;

pub use order_listener::{
    decode_envelope, ListenerStats, OrderUpdate, OrderUpdateListener, StreamEnvelope,
};
