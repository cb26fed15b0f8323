//! Completion tickets

use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::error::{NativeIoError, Result};
use crate::primitive::Outcome;

/// Pending result of a submitted call
#[derive(Debug)]
pub struct Ticket {
    receiver: Receiver<Result<Outcome>>,
}

impl Ticket {
    pub(crate) fn new(receiver: Receiver<Result<Outcome>>) -> Self {
        Self { receiver }
    }

    /// Block until the call completes
    pub fn wait(self) -> Result<Outcome> {
        self.receiver.recv().unwrap_or_else(|_| Err(abandoned()))
    }

    /// Block for at most `timeout`; gives the ticket back if still pending
    pub fn wait_timeout(self, timeout: Duration) -> std::result::Result<Result<Outcome>, Self> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) => Err(self),
            Err(RecvTimeoutError::Disconnected) => Ok(Err(abandoned())),
        }
    }

    /// The result, if the call has already completed
    pub fn try_wait(&self) -> Option<Result<Outcome>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(abandoned())),
        }
    }
}

fn abandoned() -> NativeIoError {
    NativeIoError::Busy("dispatcher stopped before the call completed".to_string())
}
