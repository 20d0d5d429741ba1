//! Module resolution and standard OS linkage.
//!
//! Resolution results are cached per context in both directions: a module
//! that loaded once is never looked up again, and a module that failed to
//! load stays unavailable for the life of the context.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::abi::{ParmList, Storage};
use crate::error::{Result, TsoError};
use crate::host::{EntryPoint, HostServices};

/// Host access for one context: the host itself, its address space and the
/// module cache.
#[derive(Debug)]
pub struct Linkage<H> {
    host: H,
    storage: Storage,
    modules: HashMap<String, Option<EntryPoint>>,
}

impl<H: HostServices> Linkage<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            storage: Storage::new(),
            modules: HashMap::new(),
        }
    }

    /// Resolve `module`, consulting the cache first.
    pub fn fetch(&mut self, module: &str) -> Result<EntryPoint> {
        let key = module.to_ascii_uppercase();
        if let Some(cached) = self.modules.get(&key) {
            return cached.clone().ok_or(TsoError::ServiceUnavailable { module: key });
        }
        let resolved = self.host.load(&key);
        match &resolved {
            Some(ep) => debug!(module = %key, address = format_args!("{:#010x}", ep.address), "fetch"),
            None => warn!(module = %key, "fetch failed; module marked unavailable"),
        }
        self.modules.insert(key.clone(), resolved.clone());
        resolved.ok_or(TsoError::ServiceUnavailable { module: key })
    }

    /// Resolve the first available module of `candidates`.
    pub fn fetch_first(&mut self, candidates: &[&str]) -> Result<EntryPoint> {
        for module in candidates {
            if let Ok(ep) = self.fetch(module) {
                return Ok(ep);
            }
        }
        Err(TsoError::ServiceUnavailable {
            module: candidates.join("/"),
        })
    }

    /// Whether `module` is known to be unavailable.
    pub fn is_unavailable(&self, module: &str) -> bool {
        matches!(self.modules.get(&module.to_ascii_uppercase()), Some(None))
    }

    /// Place `parms` in storage and branch to `entry`; returns R15.
    pub fn call(&mut self, entry: &EntryPoint, parms: &ParmList) -> Result<i32> {
        let r1 = parms.place(&mut self.storage)?;
        let r15 = self.host.call(entry, r1, &mut self.storage);
        debug!(module = %entry.module, r1 = format_args!("{r1:#010x}"), r15, "call");
        Ok(r15)
    }

    /// Run `f` inside a storage frame; everything it GETMAINs is released
    /// when it returns, whatever the outcome.
    pub fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.storage.push_frame();
        let result = f(self);
        self.storage.pop_frame();
        result
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }
}
