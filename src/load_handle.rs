//! Suspendable load tasks.
//!
//! Format loaders run their fetch-then-decode work on a `rayon` thread (same
//! pool the teacher used for background tile decode) and hand the caller a
//! [`LoadHandle`] rather than a future. The main executor polls it
//! non-blockingly once per tick — there is no async runtime in this crate,
//! matching the teacher's channel/thread concurrency model.

use crossbeam_channel::{bounded, Receiver, TryRecvError};

use crate::error::TileStreamResult;

/// A single in-flight load. Exactly one value is ever sent.
pub struct LoadHandle<T> {
    rx: Receiver<TileStreamResult<T>>,
}

/// Non-blocking poll result.
pub enum PollResult<T> {
    Pending,
    Ready(TileStreamResult<T>),
}

impl<T: Send + 'static> LoadHandle<T> {
    /// Run `work` on the global rayon pool and return a handle to its result.
    pub fn spawn(work: impl FnOnce() -> TileStreamResult<T> + Send + 'static) -> Self {
        let (tx, rx) = bounded(1);
        rayon::spawn(move || {
            let _ = tx.send(work());
        });
        Self { rx }
    }

    /// Wrap an already-resolved value (e.g. an inline payload that needed no
    /// fetch).
    pub fn ready(value: TileStreamResult<T>) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(value);
        Self { rx }
    }

    /// Non-blocking poll. Called once per tick by the content manager; never
    /// parks the calling thread.
    pub fn poll(&self) -> PollResult<T> {
        match self.rx.try_recv() {
            Ok(result) => PollResult::Ready(result),
            Err(TryRecvError::Empty) => PollResult::Pending,
            Err(TryRecvError::Disconnected) => PollResult::Ready(Err(
                crate::error::InvariantViolation::Other(
                    "load task dropped its sender without a result".into(),
                )
                .into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_handle_resolves_immediately() {
        let handle: LoadHandle<u32> = LoadHandle::ready(Ok(7));
        match handle.poll() {
            PollResult::Ready(Ok(v)) => assert_eq!(v, 7),
            _ => panic!("expected immediate ready value"),
        }
    }

    #[test]
    fn spawned_handle_eventually_resolves() {
        let handle = LoadHandle::spawn(|| Ok::<_, crate::error::TileStreamError>(21u32));
        let mut result = None;
        for _ in 0..1000 {
            match handle.poll() {
                PollResult::Ready(r) => {
                    result = Some(r);
                    break;
                }
                PollResult::Pending => std::thread::yield_now(),
            }
        }
        assert_eq!(result.unwrap().unwrap(), 21);
    }
}
