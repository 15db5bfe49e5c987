//! The rolling receive buffer and the two frame-consumption contracts
//! plugins drive a [`Connection`](super::Connection) with. Stream
//! consumers see the whole unconsumed tail on every read and report
//! back how much they used; wait-msg consumers instead ask for an
//! exact byte count up front, useful for length-prefixed or
//! fixed-size protocols that know their frame size from the header.

use bytes::BytesMut;
use thiserror::Error;

/// Fixed capacity of the rolling receive buffer. Not configurable —
/// plugins needing larger PDUs should frame at a higher layer.
pub const ROLLING_BUFFER_CAP: usize = 8192;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("rolling buffer is full")]
    Overflow,
}

/// Outcome of a single [`FrameConsumer::consume`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Not enough bytes buffered yet; leave everything and wait for
    /// more data from the socket.
    NeedMore,
    /// The data seen so far cannot be a valid frame; drop the
    /// connection.
    Fatal,
    /// A complete frame (or several) was consumed; discard the first
    /// `n` bytes and call `consume` again on what remains.
    Used(usize),
}

/// Stream-mode frame consumer: sees the whole unconsumed tail of the
/// rolling buffer on every call.
pub trait FrameConsumer: Send {
    fn consume(&mut self, cursor: &[u8]) -> ConsumeOutcome;
}

/// Wait-msg mode consumer: declares exactly how many more bytes it
/// needs before it can make progress, rather than re-scanning from the
/// front each time.
pub enum WaitMsgOutcome {
    /// Need `more` additional bytes appended before calling again.
    Need(usize),
    Fatal,
    /// A complete frame was found; discard the first `n` bytes.
    Used(usize),
}

pub trait WaitMsgConsumer: Send {
    fn consume(&mut self, cursor: &[u8]) -> WaitMsgOutcome;
}

/// Fixed-capacity rolling buffer backing a [`Connection`](super::Connection).
pub struct RollingBuffer {
    buf: BytesMut,
}

impl Default for RollingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingBuffer {
    pub fn new() -> Self {
        RollingBuffer {
            buf: BytesMut::with_capacity(ROLLING_BUFFER_CAP),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Appends freshly-read bytes, failing rather than silently
    /// dropping data if the buffer would overflow its fixed capacity.
    pub fn extend(&mut self, data: &[u8]) -> Result<(), BufferError> {
        if self.buf.len() + data.len() > ROLLING_BUFFER_CAP {
            return Err(BufferError::Overflow);
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Drives `consumer` against the buffered tail until it reports
    /// `NeedMore`, compacting consumed bytes off the front after each
    /// `Used(n)`. Returns `Err` on `Fatal` (the connection should be
    /// torn down); the buffer is left untouched in that case.
    pub fn drive_stream<C: FrameConsumer>(&mut self, consumer: &mut C) -> Result<(), ()> {
        loop {
            if self.buf.is_empty() {
                return Ok(());
            }
            match consumer.consume(&self.buf) {
                ConsumeOutcome::NeedMore => return Ok(()),
                ConsumeOutcome::Fatal => return Err(()),
                ConsumeOutcome::Used(n) => {
                    let n = n.min(self.buf.len());
                    let _ = self.buf.split_to(n);
                    if n == 0 {
                        // A consumer that reports Used(0) on a non-empty
                        // buffer would spin forever; treat it as NeedMore.
                        return Ok(());
                    }
                }
            }
        }
    }
}
