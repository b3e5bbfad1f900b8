#![allow(dead_code)]

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("packet too short")]
    ErrPacketTooShort,
    #[error("buffer too short")]
    ErrBufferTooShort,
    #[error("packet too big")]
    ErrPacketTooBig,
    #[error("invalid rtp/rtcp version")]
    ErrBadVersion,
    #[error("wrong packet type")]
    ErrWrongType,
    #[error("invalid padding length")]
    ErrBadPadding,
    #[error("invalid header")]
    ErrInvalidHeader,
    #[error("header extension id must be between 1 and 14 for one-byte profile")]
    ErrInvalidExtensionId,
    #[error("header extension payload must be 16 bytes or fewer for one-byte profile")]
    ErrExtensionPayloadTooLarge,
    #[error("header extensions not enabled")]
    ErrHeaderExtensionsNotEnabled,
    #[error("extension not found")]
    ErrExtensionNotFound,
    #[error("too many reception reports")]
    ErrTooManyReports,
    #[error("cumulative lost exceeds 24 bits")]
    ErrInvalidTotalLost,
    #[error("too many chunks")]
    ErrTooManyChunks,
    #[error("too many sources")]
    ErrTooManySources,
    #[error("sdes text too long")]
    ErrSdesTextTooLong,
    #[error("bye reason too long")]
    ErrReasonTooLong,
    #[error("application packet name must be 4 octets")]
    ErrBadAppName,
    #[error("application packet data must be a multiple of 4 octets")]
    ErrAppDataNotAligned,
    #[error("packet status chunk must be 2 bytes")]
    ErrPacketStatusChunkLength,
    #[error("delta exceeds the representable limit")]
    ErrDeltaExceedLimit,
    #[error("wrong feedback message format")]
    ErrWrongFeedbackFormat,
    #[error("wrong payload size")]
    ErrWrongPayloadSize,
    #[error("bitrate not representable")]
    ErrBitrateOutOfRange,
    #[error("ssrc already in use with a different role or cname")]
    ErrSsrcInUse,
    #[error("unknown ssrc")]
    ErrUnknownSsrc,
    #[error("retransmission not enabled for ssrc")]
    ErrRtxNotEnabled,
    #[error("retransmission payload too short")]
    ErrRtxPayloadTooShort,
    #[error("session is closed")]
    ErrSessionClosed,
    #[error("no transport attached")]
    ErrNoTransport,
    #[error("transport is not established")]
    ErrTransportNotEstablished,
    #[error("{0}")]
    Other(String),
}
