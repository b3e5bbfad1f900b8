pub mod abs_send_time_extension;
pub mod transport_cc_extension;

pub use abs_send_time_extension::AbsSendTimeExtension;
pub use transport_cc_extension::TransportCcExtension;
