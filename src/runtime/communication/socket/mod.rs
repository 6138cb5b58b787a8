//! The raw transport backend. A `Socket` is a plain, unencrypted byte
//! stream; `Conn` (in the parent module) layers framing, and
//! `async-tls`/`rustls` layer encryption on top of it.

#[cfg(feature = "socket_tokio_tcp")]
mod tokio_tcp;

#[cfg(feature = "socket_tokio_tcp")]
pub use self::tokio_tcp::{bind, connect, Listener, Socket};
