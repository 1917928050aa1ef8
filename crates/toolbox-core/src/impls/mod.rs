//! Impls - channel implementations shipped with the core.
//!
//! - **VirtualChannel**: loopback, for simulation and tests
//! - **TcpChannel**: raw stream to a LAN adapter
//!
//! A serial backend is not part of this build; see `config::ConnectionConfig`.

pub mod tcp_channel;
pub mod virtual_channel;

pub use self::tcp_channel::TcpChannel;
pub use self::virtual_channel::VirtualChannel;
