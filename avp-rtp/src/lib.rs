#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod extension;
pub mod header;
pub mod packet;
pub mod rtx;

pub use header::Header;
pub use packet::Packet;
