//! FIFO serialization of jobs that log in with the same portal account.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::sanitize;

/// Hands out turns per credential key in submission order.
///
/// Each turn owns the completion signal of its own job and, when another job
/// for the same account is still ahead, the signal of that job. Dropping a
/// turn releases the next one in line.
#[derive(Default)]
pub struct CredentialQueue {
    tails: Mutex<HashMap<String, oneshot::Receiver<()>>>,
}

impl CredentialQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the next turn for `username`.
    pub fn enqueue(&self, username: &str) -> CredentialTurn {
        let key = sanitize::credential_key(username);
        let (release, tail) = oneshot::channel();

        let mut tails = match self.tails.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Credential queue lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        // Drop chains whose last job has already finished.
        tails.retain(|_, rx| matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        let ahead = tails.insert(key, tail);

        CredentialTurn {
            ahead,
            _release: release,
        }
    }

    /// Number of accounts with a job still holding or awaiting a turn.
    pub fn active_accounts(&self) -> usize {
        match self.tails.lock() {
            Ok(mut tails) => {
                tails.retain(|_, rx| matches!(rx.try_recv(), Err(TryRecvError::Empty)));
                tails.len()
            }
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// A job's place in its account's queue. Released on drop.
pub struct CredentialTurn {
    ahead: Option<oneshot::Receiver<()>>,
    _release: oneshot::Sender<()>,
}

impl CredentialTurn {
    /// Whether the job ahead (if any) has already finished.
    pub fn is_ready(&mut self) -> bool {
        let Some(rx) = self.ahead.as_mut() else {
            return true;
        };
        match rx.try_recv() {
            Err(TryRecvError::Empty) => false,
            _ => {
                self.ahead = None;
                true
            }
        }
    }

    /// Waits until the job ahead has released its turn.
    pub async fn wait(&mut self) {
        if let Some(rx) = self.ahead.take() {
            // The sender is only ever dropped, so an error means "released".
            let _ = rx.await;
        }
    }
}
