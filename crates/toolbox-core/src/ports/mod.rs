//! Ports - seams to the outside world.
//!
//! - **Channel**: the single shared path to the device
//! - **Script**: one compiled automation unit
//!
//! Implementations live in `impls` (channels) and in the binary (scripts).

pub mod channel;
pub mod script;

pub use self::channel::{Channel, ChannelError, ChannelEvent, ConnectionState};
pub use self::script::{FnScript, Script, script_fn};
