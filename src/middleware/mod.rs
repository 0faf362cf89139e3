//! # Middleware Pipeline
//!
//! Ordered interception of named actions. Handlers for an action run
//! in registration order, followed by wildcard handlers in theirs.
//! Each dispatch runs its chain strictly sequentially through a
//! continuation; a handler error stops the chain immediately.
//!
//! The registration table is owned by one backend instance and read
//! through a defensive snapshot per dispatch, so concurrent
//! registration never corrupts an in-progress chain.

mod errors;
mod request;

pub use errors::{
    HookError, HookResult, ERR_SNAPSHOT_READ_REJECTED, ERR_SNAPSHOT_READ_SILENT_REJECTION,
};
pub use request::{actions, Request, SnapshotReadContext, SubmitContext};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

/// Boxed future returned by middleware handlers.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = HookResult> + Send + 'a>>;

/// One interception handler.
///
/// A handler may await before deciding; independent dispatches
/// interleave only at await points and never within one chain's
/// ordering.
pub trait Middleware: Send + Sync {
    fn handle<'a>(&'a self, request: &'a mut Request, next: Next<'a>) -> HookFuture<'a>;
}

/// Continuation to the rest of a dispatch chain.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    /// Run the remaining handlers. An empty chain resolves
    /// immediately with no error.
    pub fn run(self, request: &'a mut Request) -> HookFuture<'a> {
        Box::pin(async move {
            if let Some((first, rest)) = self.chain.split_first() {
                first.handle(request, Next { chain: rest }).await
            } else {
                Ok(())
            }
        })
    }
}

/// Registration table: action name (empty string = wildcard) to an
/// ordered sequence of handlers.
pub struct Registry {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn Middleware>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for one action.
    pub fn use_for(&self, action: &str, middleware: impl Middleware + 'static) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers
                .entry(action.to_string())
                .or_default()
                .push(Arc::new(middleware));
        }
    }

    /// Register a wildcard handler, run for every action after the
    /// action-specific handlers.
    pub fn use_all(&self, middleware: impl Middleware + 'static) {
        self.use_for(actions::ALL, middleware);
    }

    /// Dispatch a request through the effective chain for its action.
    pub async fn trigger(&self, request: &mut Request) -> HookResult {
        let chain = self.chain_for(request.action());
        Next { chain: &chain }.run(request).await
    }

    /// Snapshot the effective chain: action handlers concatenated
    /// with wildcard handlers.
    fn chain_for(&self, action: &str) -> Vec<Arc<dyn Middleware>> {
        let Ok(handlers) = self.handlers.read() else {
            return Vec::new();
        };
        let mut chain = Vec::new();
        if let Some(named) = handlers.get(action) {
            chain.extend(named.iter().cloned());
        }
        if !action.is_empty() {
            if let Some(wildcard) = handlers.get(actions::ALL) {
                chain.extend(wildcard.iter().cloned());
            }
        }
        chain
    }

    /// Number of handlers registered for an action (excluding
    /// wildcard handlers).
    pub fn handler_count(&self, action: &str) -> usize {
        self.handlers
            .read()
            .map(|h| h.get(action).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
