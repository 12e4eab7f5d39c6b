pub mod client;
pub mod stream;

pub use client::{GatewayClient, GatewayConfig, GatewayError};
pub use stream::{
    generate_turn_stream, open_first_step, GatewayMessage, GenerationEvent, TurnRequest, UsageInfo,
};
