// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Shared handle exposing the three calling conventions

use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::FsResult;
use crate::vfs::FsCore;

/// Cloneable handle onto one [`FsCore`].
///
/// `call`, `call_with` and `call_async` run the same closure against the
/// engine; only the way the result reaches the caller differs.
#[derive(Clone, Debug)]
pub struct SharedFs {
    inner: Arc<FsCore>,
}

impl SharedFs {
    pub fn new(fs: FsCore) -> Self {
        Self { inner: Arc::new(fs) }
    }

    /// Synchronous convention: the result is returned directly
    pub fn call<T>(&self, op: impl FnOnce(&FsCore) -> FsResult<T>) -> FsResult<T> {
        op(&self.inner)
    }

    /// Error-first callback convention. The callback runs after the
    /// operation has released the engine lock, so it may call back in.
    pub fn call_with<T>(
        &self,
        op: impl FnOnce(&FsCore) -> FsResult<T>,
        callback: impl FnOnce(FsResult<T>),
    ) {
        let result = op(&self.inner);
        callback(result);
    }

    /// Future convention. The operation runs when the future is first
    /// polled and completes without suspending.
    pub fn call_async<T, F>(&self, op: F) -> impl Future<Output = FsResult<T>>
    where
        F: FnOnce(&FsCore) -> FsResult<T>,
    {
        let inner = Arc::clone(&self.inner);
        async move { op(&inner) }
    }
}

impl Deref for SharedFs {
    type Target = FsCore;

    fn deref(&self) -> &FsCore {
        &self.inner
    }
}

impl From<FsCore> for SharedFs {
    fn from(fs: FsCore) -> Self {
        Self::new(fs)
    }
}
