use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::error::LkError;

/// One step of a fetch-with-fallback chain: a producer, a success predicate
/// and a timeout of its own.
pub struct Strategy<T> {
    name: &'static str,
    timeout: Duration,
    run: Box<dyn FnOnce() -> Result<T, LkError> + Send>,
    accept: Box<dyn Fn(&T) -> bool>,
}

/// Ordered list of strategies tried in sequence; the first accepted result
/// short-circuits. A strategy that errors, overruns its timeout, or fails its
/// predicate falls through to the next one.
pub struct FallbackChain<T> {
    strategies: Vec<Strategy<T>>,
}

impl<T: Send + 'static> FallbackChain<T> {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    pub fn strategy(
        mut self,
        name: &'static str,
        timeout: Duration,
        run: impl FnOnce() -> Result<T, LkError> + Send + 'static,
        accept: impl Fn(&T) -> bool + 'static,
    ) -> Self {
        self.strategies.push(Strategy {
            name,
            timeout,
            run: Box::new(run),
            accept: Box::new(accept),
        });
        self
    }

    /// Run the chain. Each producer executes on its own thread so a stalled
    /// strategy cannot block past its timeout; a late result is discarded.
    pub fn execute(self) -> Result<T, LkError> {
        let mut attempts = Vec::new();
        for strategy in self.strategies {
            let Strategy {
                name,
                timeout,
                run,
                accept,
            } = strategy;

            let (tx, rx) = mpsc::channel();
            thread::spawn(move || {
                let _ = tx.send(run());
            });

            match rx.recv_timeout(timeout) {
                Ok(Ok(value)) if accept(&value) => {
                    info!("load strategy '{name}' succeeded");
                    return Ok(value);
                }
                Ok(Ok(_)) => {
                    info!("load strategy '{name}' rejected by predicate");
                    attempts.push(format!("{name}: rejected"));
                }
                Ok(Err(e)) => {
                    warn!("load strategy '{name}' failed: {e}");
                    attempts.push(format!("{name}: {e}"));
                }
                Err(_) => {
                    warn!("load strategy '{name}' timed out after {timeout:?}");
                    attempts.push(format!("{name}: timed out"));
                }
            }
        }
        Err(LkError::LoadFailed(attempts.join("; ")))
    }
}

impl<T: Send + 'static> Default for FallbackChain<T> {
    fn default() -> Self {
        Self::new()
    }
}
