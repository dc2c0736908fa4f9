pub mod events;
pub mod health;
pub mod host;
pub mod message;

pub use events::*;
pub use health::*;
pub use host::*;
pub use message::*;
