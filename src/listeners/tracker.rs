//! Listener tracker — the one piece of genuinely shared mutable state.
//!
//! Running listeners are tracked by name in a mutex-guarded map so that
//! concurrent start/shutdown calls cannot double-start a name or lose a
//! shutdown. Start and shutdown are idempotent: starting a live name is a
//! logged no-op that does not leak the already-bound instance, and
//! shutting down an unknown name does nothing.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::host::HostContext;
use crate::templates::TemplateError;

use super::{LauncherRequest, Listener};

/// Liveness map for started listeners.
#[derive(Default)]
pub struct ListenerTracker {
    live: Mutex<HashMap<String, Box<dyn Listener>>>,
}

impl ListenerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and start a listener, tracking it under `name` (or the
    /// listener's own configured name when `name` is empty).
    ///
    /// Returns the tracking name. Starting a name that is already live is
    /// a no-op: the new instance is dropped unbound and the live one keeps
    /// running.
    pub fn start(
        &self,
        name: &str,
        mut listener: Box<dyn Listener>,
        host: &HostContext,
    ) -> Result<String, TemplateError> {
        let name = if name.trim().is_empty() {
            listener.name()
        } else {
            name.to_string()
        };
        if name.trim().is_empty() {
            return Err(TemplateError::Validation(
                "listener has no name to track it by".to_string(),
            ));
        }

        let mut live = self.live.lock();
        if live.contains_key(&name) {
            log::warn!("listener \"{}\" is already running", name);
            return Ok(name);
        }

        listener.validate_options()?;
        listener.on_start(host)?;
        log::info!("started listener \"{}\"", name);
        live.insert(name.clone(), listener);
        Ok(name)
    }

    /// Stop and untrack a listener. Unknown names are a no-op.
    ///
    /// Returns whether a listener was actually stopped.
    pub fn shutdown(&self, name: &str) -> bool {
        let mut live = self.live.lock();
        match live.remove(name) {
            Some(mut listener) => {
                listener.on_shutdown();
                log::info!("stopped listener \"{}\"", name);
                true
            }
            None => {
                log::debug!("shutdown for unknown listener \"{}\" ignored", name);
                false
            }
        }
    }

    /// Whether a listener with this name is currently live.
    pub fn is_valid(&self, name: &str) -> bool {
        self.live.lock().contains_key(name)
    }

    /// Names of all live listeners.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.live.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Generate a launcher through a live listener.
    ///
    /// Resolution is against liveness, not the template registry: a loaded
    /// but never-started listener is not a valid reference.
    pub fn generate_launcher(
        &self,
        host: &HostContext,
        name: &str,
        request: &LauncherRequest,
    ) -> Result<String, TemplateError> {
        let live = self.live.lock();
        let listener = live
            .get(name)
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;
        listener.generate_launcher(host, request)
    }
}
