// Copyright 2024 chonkfs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use tokio_util::sync::CancellationToken;

static NEXT_UNIQUE: AtomicU64 = AtomicU64::new(1);

/// Context is passed through every operation of the storage stack.
///
/// Cancelling it makes the next cancellation check of an in-flight
/// operation fail. Work done before the check is kept, cancellation is not a
/// rollback.
#[derive(Debug, Clone)]
pub struct Context {
    pub unique:             u64,
    pub start_at:           Instant,
    pub cancellation_token: CancellationToken,
}

impl Context {
    pub fn background() -> Self { Self::with_token(CancellationToken::new()) }

    pub fn with_token(cancellation_token: CancellationToken) -> Self {
        Self {
            unique: NEXT_UNIQUE.fetch_add(1, Ordering::Relaxed),
            start_at: Instant::now(),
            cancellation_token,
        }
    }

    /// A context which is cancelled together with this one, but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self { Self::with_token(self.cancellation_token.child_token()) }

    pub fn cancel(&self) { self.cancellation_token.cancel() }

    pub fn is_cancelled(&self) -> bool { self.cancellation_token.is_cancelled() }
}

impl Default for Context {
    fn default() -> Self { Self::background() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_follows_parent() {
        let parent = Context::background();
        let child = parent.child();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_cancel_is_local() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert_ne!(parent.unique, child.unique);
    }
}
