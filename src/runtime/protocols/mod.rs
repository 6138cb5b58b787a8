//! Concrete protocol implementations built on top of
//! [`crate::runtime::protocol::ProtocolInstance`].

pub mod cosi;
pub mod count;
