use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::debug;

use crate::{AppError, AppResult};

/// Mutations currently running, keyed by user, operation and subject.
///
/// A second submission of the same key while the first is in flight is
/// rejected instead of queued. The key is released when the [`Busy`] guard
/// drops, whether the operation succeeded or not.
#[derive(Clone, Default)]
pub struct InFlight {
    keys: Arc<Mutex<HashSet<String>>>,
}

pub struct Busy {
    key: String,
    keys: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    pub fn acquire(&self, user_id: &str, operation: &str, subject: &str) -> AppResult<Busy> {
        let key = format!("{user_id}/{operation}/{subject}");
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        if !keys.insert(key.clone()) {
            debug!("duplicate submission of {key}");
            return Err(AppError::conflict(format!("{operation} is already in progress")));
        }

        Ok(Busy {
            key,
            keys: self.keys.clone(),
        })
    }

    pub fn is_busy(&self, user_id: &str, operation: &str, subject: &str) -> bool {
        let key = format!("{user_id}/{operation}/{subject}");
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).contains(&key)
    }
}

impl Drop for Busy {
    fn drop(&mut self) {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.key);
    }
}
