#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod application_defined;
pub mod extended_report;
pub mod goodbye;
pub mod header;
pub mod packet;
pub mod payload_feedbacks;
pub mod raw_packet;
pub mod receiver_report;
pub mod reception_report;
pub mod sender_report;
pub mod source_description;
pub mod transport_feedbacks;

pub use header::{Header, PacketType};
pub use packet::{Packet, marshal_compound};
