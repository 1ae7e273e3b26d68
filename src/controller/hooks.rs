//! # Hook Registry
//!
//! Mutation hooks run against every desired object before it is persisted.
//!
//! Hooks are appended at startup and never removed. A single mutex guards both
//! registration and invocation, so hooks registered while reconciliations are
//! running are picked up by the next apply without racing the current one.

use crate::crd::ArgoCD;
use kube::api::DynamicObject;
use std::sync::Mutex;

/// A hook receives the owning instance, the candidate object and a hint naming
/// the component being applied (for example `server` or `dex`)
pub type Hook = Box<dyn Fn(&ArgoCD, &mut DynamicObject, &str) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
pub struct HookRegistry {
    hooks: Mutex<Vec<Hook>>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.len())
            .finish()
    }
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook; it runs after every hook registered before it
    pub fn register<F>(&self, hook: F)
    where
        F: Fn(&ArgoCD, &mut DynamicObject, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        match self.hooks.lock() {
            Ok(mut hooks) => hooks.push(Box::new(hook)),
            Err(poisoned) => poisoned.into_inner().push(Box::new(hook)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self.hooks.lock() {
            Ok(hooks) => hooks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every hook in registration order; the first error stops the chain
    /// and is returned as-is
    pub fn apply(&self, cr: &ArgoCD, obj: &mut DynamicObject, hint: &str) -> anyhow::Result<()> {
        let hooks = self
            .hooks
            .lock()
            .map_err(|e| anyhow::anyhow!("hook registry lock poisoned: {e}"))?;
        for hook in hooks.iter() {
            hook(cr, obj, hint)?;
        }
        Ok(())
    }
}
