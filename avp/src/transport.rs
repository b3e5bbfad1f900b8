use std::net::SocketAddr;

use bytes::BytesMut;

use shared::error::Result;

use crate::Status;

/// Which of the two session subchannels a buffer belongs to. With rtcp-mux
/// both map to the same socket.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SubChannel {
    Data,
    Control,
}

/// The transport collaborator: delivers raw buffers per subchannel and
/// accepts buffers to send. Socket handling, NAT traversal and read threads
/// live behind this trait.
pub trait MediaTransport: Send + Sync {
    fn is_established(&self) -> bool;

    /// Best-effort, non-blocking write. An error here means the transport is
    /// unusable, not that a destination is merely unknown yet.
    fn write(&self, data: &[u8], subchannel: SubChannel, dest: Option<SocketAddr>) -> Result<()>;

    fn set_remote_address(&self, addr: SocketAddr, subchannel: SubChannel);

    fn local_address(&self, subchannel: SubChannel) -> Option<SocketAddr>;

    fn remote_address(&self, subchannel: SubChannel) -> Option<SocketAddr>;
}

/// Optional protect/unprotect step applied between this engine's wire
/// serialization and the transport. Key management is out of scope.
pub trait CryptoContext: Send + Sync {
    fn protect(&self, data: &mut BytesMut, subchannel: SubChannel) -> Status;

    fn unprotect(&self, data: &mut BytesMut, subchannel: SubChannel) -> Status;
}
