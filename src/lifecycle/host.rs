//! Module Host
//!
//! Registry-backed lifecycle execution for managed modules. A module is
//! registered by id with its on-disk path, and the host drives the
//! named phases `initialize`, `execute` and `cleanup` through the
//! sandbox rather than loading module code into this process.
//!
//! The phase contract is deliberately asymmetric: `initialize` and
//! `cleanup` are optional hooks and succeed by default when a module
//! does not define them, while `execute` is mandatory. Failures are
//! typed so callers can tell a module that lacks a hook apart from one
//! whose hook ran and failed.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{Sandbox, SandboxLimits};

pub const PHASE_INITIALIZE: &str = "initialize";
pub const PHASE_EXECUTE: &str = "execute";
pub const PHASE_CLEANUP: &str = "cleanup";

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("module not registered: {0}")]
    ModuleNotRegistered(String),

    #[error("module file not found: {0}")]
    ModuleFileMissing(String),

    /// The module does not define the requested entry point. Only
    /// raised for mandatory phases; optional phases skip instead.
    #[error("entry point '{entry}' missing in module '{module_id}'")]
    EntryPointMissing { module_id: String, entry: String },

    /// The entry point exists but its execution failed.
    #[error("entry point '{entry}' failed in module '{module_id}': {message}")]
    EntryPointFailed {
        module_id: String,
        entry: String,
        message: String,
    },
}

/// One entry in the host registry.
#[derive(Clone, Debug, Serialize)]
pub struct RegisteredModule {
    pub module_id: String,
    pub path: String,
    pub initialized: bool,
    pub registered_at: String,
}

/// Result of driving a full lifecycle pass over one module.
#[derive(Clone, Debug, Serialize)]
pub struct PhaseReport {
    pub module_id: String,
    pub initialize: Value,
    pub execute: Value,
    pub cleanup: Value,
}

pub struct ModuleHost {
    sandbox: Arc<dyn Sandbox>,
    limits: SandboxLimits,
    modules: Mutex<HashMap<String, RegisteredModule>>,
}

impl ModuleHost {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        ModuleHost {
            sandbox,
            limits: SandboxLimits::default(),
            modules: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_limits(mut self, limits: SandboxLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Add a module to the registry. Registering an id again replaces
    /// the previous path, so a repaired module can be re-registered in
    /// place.
    pub fn register(&self, module_id: &str, path: &str) -> Result<(), LifecycleError> {
        if !Path::new(path).exists() {
            return Err(LifecycleError::ModuleFileMissing(path.to_string()));
        }
        let entry = RegisteredModule {
            module_id: module_id.to_string(),
            path: path.to_string(),
            initialized: false,
            registered_at: Utc::now().to_rfc3339(),
        };
        let replaced = self
            .modules
            .lock()
            .unwrap()
            .insert(module_id.to_string(), entry)
            .is_some();
        if replaced {
            info!("Re-registered module '{}' at {}", module_id, path);
        } else {
            info!("Registered module '{}' at {}", module_id, path);
        }
        Ok(())
    }

    pub fn unregister(&self, module_id: &str) -> bool {
        self.modules.lock().unwrap().remove(module_id).is_some()
    }

    pub fn is_registered(&self, module_id: &str) -> bool {
        self.modules.lock().unwrap().contains_key(module_id)
    }

    /// Registry contents, sorted by module id.
    pub fn registered_modules(&self) -> Vec<RegisteredModule> {
        let mut modules: Vec<RegisteredModule> =
            self.modules.lock().unwrap().values().cloned().collect();
        modules.sort_by(|a, b| a.module_id.cmp(&b.module_id));
        modules
    }

    /// Run the optional `initialize` hook. Succeeds with a skip marker
    /// when the module does not define one.
    pub async fn initialize(&self, module_id: &str, payload: &Value) -> Result<Value, LifecycleError> {
        let module = self.lookup(module_id)?;
        let result = self.run_phase(&module, PHASE_INITIALIZE, payload, true).await?;
        if let Some(entry) = self.modules.lock().unwrap().get_mut(module_id) {
            entry.initialized = true;
        }
        Ok(result)
    }

    /// Run the mandatory `execute` entry point.
    pub async fn execute(&self, module_id: &str, payload: &Value) -> Result<Value, LifecycleError> {
        let module = self.lookup(module_id)?;
        self.run_phase(&module, PHASE_EXECUTE, payload, false).await
    }

    /// Run the optional `cleanup` hook and mark the module
    /// uninitialized again.
    pub async fn cleanup(&self, module_id: &str, payload: &Value) -> Result<Value, LifecycleError> {
        let module = self.lookup(module_id)?;
        let result = self.run_phase(&module, PHASE_CLEANUP, payload, true).await?;
        if let Some(entry) = self.modules.lock().unwrap().get_mut(module_id) {
            entry.initialized = false;
        }
        Ok(result)
    }

    /// Drive all three phases in order. Cleanup still runs when
    /// execute fails, and the execute error is the one returned.
    pub async fn run_lifecycle(
        &self,
        module_id: &str,
        payload: &Value,
    ) -> Result<PhaseReport, LifecycleError> {
        let initialize = self.initialize(module_id, payload).await?;
        let executed = self.execute(module_id, payload).await;
        let cleanup = self.cleanup(module_id, payload).await?;

        let execute = executed?;
        Ok(PhaseReport {
            module_id: module_id.to_string(),
            initialize,
            execute,
            cleanup,
        })
    }

    fn lookup(&self, module_id: &str) -> Result<RegisteredModule, LifecycleError> {
        self.modules
            .lock()
            .unwrap()
            .get(module_id)
            .cloned()
            .ok_or_else(|| LifecycleError::ModuleNotRegistered(module_id.to_string()))
    }

    async fn run_phase(
        &self,
        module: &RegisteredModule,
        entry: &str,
        payload: &Value,
        optional: bool,
    ) -> Result<Value, LifecycleError> {
        let outcome = self
            .sandbox
            .run_module(&module.path, entry, payload, &self.limits)
            .await;

        if outcome.ok {
            return Ok(outcome.result.unwrap_or_else(|| json!({"ok": true})));
        }

        if outcome.is_entry_missing() {
            if optional {
                debug!(
                    "Module '{}' does not define '{}', phase skipped",
                    module.module_id, entry
                );
                return Ok(json!({"ok": true, "skipped": entry}));
            }
            return Err(LifecycleError::EntryPointMissing {
                module_id: module.module_id.clone(),
                entry: entry.to_string(),
            });
        }

        Err(LifecycleError::EntryPointFailed {
            module_id: module.module_id.clone(),
            entry: entry.to_string(),
            message: outcome
                .error
                .unwrap_or_else(|| "unknown failure".to_string()),
        })
    }
}
