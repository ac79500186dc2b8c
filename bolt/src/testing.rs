//! Hand-driven transport and timers for exercising a `Connection` without an event loop.

use std::io;
use std::time::Duration;

use bolt_codec::{Frame, FrameCodec};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::{TimerId, Timers, Transport};

#[derive(Debug, Default)]
pub struct MockTransport {
    pub writes: Vec<Vec<u8>>,
    pub closed: bool,
    pub fail_writes: bool,
}

impl MockTransport {
    /// Decodes every write after the upgrade request as one frame.
    pub fn frames(&self) -> Vec<Frame> {
        self.writes
            .iter()
            .skip(1)
            .map(|data| {
                let mut src = BytesMut::from(&data[..]);
                let frame = FrameCodec::new().decode(&mut src).unwrap().unwrap();
                assert!(src.is_empty());
                frame
            })
            .collect()
    }
}

impl Transport for MockTransport {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
        }

        self.writes.push(data.to_vec());
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Timers on a virtual clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualTimers {
    now: Duration,
    scheduled: Vec<(Duration, TimerId)>,
}

impl ManualTimers {
    /// Returns the live timers as `(deadline, id)`, soonest first.
    pub fn pending(&self) -> Vec<(Duration, TimerId)> {
        let mut pending = self.scheduled.clone();
        pending.sort_by_key(|&(deadline, _)| deadline);
        pending
    }

    /// Moves the clock forward, returning the timers that expire on the way, soonest first.
    pub fn advance(&mut self, by: Duration) -> Vec<TimerId> {
        self.now += by;
        let now = self.now;
        let expired: Vec<_> = self
            .pending()
            .into_iter()
            .filter(|&(deadline, _)| deadline <= now)
            .map(|(_, id)| id)
            .collect();

        self.scheduled.retain(|&(deadline, _)| deadline > now);
        expired
    }
}

impl Timers for ManualTimers {
    fn schedule(&mut self, id: TimerId, after: Duration) {
        self.scheduled.push((self.now + after, id));
    }

    fn cancel(&mut self, id: TimerId) {
        self.scheduled.retain(|&(_, scheduled)| scheduled != id);
    }
}
