use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, TryRecvError};
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Work running on its own thread. The result comes back over a channel.
pub struct BackgroundOp<T> {
    name: String,
    rx: Receiver<Result<T>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> BackgroundOp<T> {
    pub fn spawn<F>(name: impl Into<String>, op: F) -> Result<Self>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let name = name.into();
        let (tx, rx) = bounded(1);
        let thread_name = name.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            debug!("Background op {} started", thread_name);
            let result = op();
            if tx.send(result).is_err() {
                debug!("Nobody is waiting for background op {}", thread_name);
            }
            debug!("Background op {} finished", thread_name);
        })?;
        Ok(Self {
            name,
            rx,
            handle: Some(handle),
        })
    }

    /// Blocks until the op finishes.
    pub fn wait(mut self) -> Result<T> {
        let received = self.rx.recv();
        self.join();
        received.map_err(|_| self.panicked())?
    }

    /// Returns `None` while the op is still running.
    pub fn try_result(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => {
                self.join();
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.join();
                Some(Err(self.panicked()))
            }
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Background op {} panicked", self.name);
            }
        }
    }

    fn panicked(&self) -> Error {
        Error::Cache(format!("background op {} ended without a result", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_wait_returns_value() -> anyhow::Result<()> {
        let op = BackgroundOp::spawn("answer", || Ok(42))?;
        assert_eq!(op.wait()?, 42);
        Ok(())
    }

    #[test]
    fn test_error_is_delivered() -> anyhow::Result<()> {
        let op =
            BackgroundOp::<()>::spawn("fails", || Err(Error::NotFound("nothing".to_string())))?;
        assert!(matches!(op.wait(), Err(Error::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_try_result_polls() -> anyhow::Result<()> {
        let (go_tx, go_rx) = bounded::<()>(1);
        let mut op = BackgroundOp::spawn("gated", move || {
            let _ = go_rx.recv();
            Ok("done")
        })?;
        assert!(op.try_result().is_none());
        go_tx.send(())?;
        loop {
            if let Some(result) = op.try_result() {
                assert_eq!(result?, "done");
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}
