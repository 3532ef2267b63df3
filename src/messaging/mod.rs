mod bus;
mod types;

pub use bus::{MessageBus, Received};
pub use types::CoreMessage;
