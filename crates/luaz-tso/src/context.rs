//! The TSO session context.
//!
//! [`TsoContext`] owns everything that lives longer than one command: the
//! host linkage and module cache, the capability, the name counter and
//! live bindings, the legacy offset cursor, the configuration and the
//! cleanup failures not yet collected. Independent contexts do not share
//! state.

use serde::Serialize;
use tracing::{debug, info};

use crate::alloc::{AllocSpec, AllocationManager, AllocationResult, BindingName};
use crate::cleanup;
use crate::config::{CaptureMode, TsoConfig};
use crate::error::{Result, TsoError};
use crate::host::{HostServices, MessageLevel};
use crate::invoke::{self, InvocationOutcome, Route};
use crate::legacy::LegacyCapture;
use crate::linkage::Linkage;
use crate::operands;
use crate::probe::{Capability, EnvState, EnvironmentProber};
use crate::reader;

/// Per-command options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandOptions {
    /// Capture output; `None` takes `tso.cmd.capture.default`.
    pub capture: Option<bool>,
    /// Run through the authorized command processor.
    pub authorized: bool,
    /// Override `tso.cmd.mode` for this command.
    pub mode: Option<CaptureMode>,
}

/// Which path produced the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapturePath {
    /// IKJEFTSR/TSOEFTR with a private output DD.
    Direct,
    /// IRXEXEC and the shared output DD.
    Legacy,
    /// No capture; output went to the terminal.
    Uncaptured,
}

/// A completed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub invocation: InvocationOutcome,
    pub path: CapturePath,
    /// Private DD the output was captured in, already freed.
    pub binding: Option<BindingName>,
    /// Lines dropped by `limits.output.lines`.
    pub truncated: usize,
    /// Set when the private DD could not be freed.
    pub cleanup: Option<TsoError>,
}

impl CommandOutcome {
    pub fn rc(&self) -> i32 {
        self.invocation.command_rc
    }

    pub fn lines(&self) -> &[String] {
        &self.invocation.lines
    }
}

#[derive(Debug)]
pub struct TsoContext<H> {
    link: Linkage<H>,
    prober: EnvironmentProber,
    alloc: AllocationManager,
    legacy: LegacyCapture,
    config: TsoConfig,
    cleanup_failures: Vec<TsoError>,
}

impl<H: HostServices> TsoContext<H> {
    pub fn new(host: H, config: TsoConfig) -> Self {
        let legacy = LegacyCapture::new(&config.rexx_exec, &config.rexx_dd, &config.out_dd);
        Self {
            link: Linkage::new(host),
            prober: EnvironmentProber::new(),
            alloc: AllocationManager::new(),
            legacy,
            config,
            cleanup_failures: Vec::new(),
        }
    }

    /// Establish the TSO environment (probes at most once).
    pub fn initialize(&mut self) -> Result<Capability> {
        self.prober.initialize(&mut self.link)
    }

    /// Use the CPPL of an enclosing command processor.
    pub fn adopt_external_token(&mut self, cppl: u32) -> Capability {
        self.prober.adopt_external_token(cppl)
    }

    pub fn env_state(&self) -> &EnvState {
        self.prober.state()
    }

    pub fn probe_count(&self) -> usize {
        self.prober.probe_count()
    }

    /// Run one TSO command.
    pub fn run_command(&mut self, text: &str, options: CommandOptions) -> Result<CommandOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TsoError::InvalidCommand {
                reason: "command text is empty".to_string(),
            });
        }
        let verb = operands::verb(text);
        if !self.config.policy.permits(&verb) {
            return Err(TsoError::PolicyDenied { command: verb });
        }
        let cap = self.initialize()?;
        let route = if options.authorized {
            Route::AuthorizedProcessor
        } else {
            Route::Standard
        };

        let mut outcome = if !options.capture.unwrap_or(self.config.capture_default) {
            let invocation = invoke::run(&mut self.link, cap, route, text, None)?;
            CommandOutcome {
                invocation,
                path: CapturePath::Uncaptured,
                binding: None,
                truncated: 0,
                cleanup: None,
            }
        } else {
            match options.mode.unwrap_or(self.config.capture_mode) {
                CaptureMode::Direct => self.run_direct(cap, route, text)?,
                CaptureMode::Legacy => self.run_legacy(cap, route, text)?,
                CaptureMode::Auto => match self.run_direct(cap, route, text) {
                    Err(TsoError::ServiceUnavailable { module }) if route == Route::Standard => {
                        info!(%module, "direct capture unavailable; using IRXEXEC");
                        self.run_legacy(cap, route, text)?
                    }
                    other => other?,
                },
            }
        };

        if let Some(limit) = self.config.output_line_limit {
            let lines = &mut outcome.invocation.lines;
            if lines.len() > limit {
                outcome.truncated = lines.len() - limit;
                debug!(limit, dropped = outcome.truncated, "output truncated");
                lines.truncate(limit);
            }
        }
        Ok(outcome)
    }

    fn run_direct(&mut self, cap: Capability, route: Route, text: &str) -> Result<CommandOutcome> {
        // Resolve before allocating so a missing service costs no DAIR calls.
        invoke::resolve(&mut self.link, route)?;
        let mut used = None;
        let released = cleanup::with_binding(
            &mut self.alloc,
            &mut self.link,
            cap,
            None,
            |link, binding| {
                used = Some(binding.clone());
                let mut invocation = invoke::run(link, cap, route, text, Some(binding))?;
                invocation.lines = reader::read_lines(link, binding.as_str())?;
                Ok(invocation)
            },
        )?;
        if let Some(err) = &released.cleanup {
            self.cleanup_failures.push(err.clone());
        }
        Ok(CommandOutcome {
            invocation: released.result?,
            path: CapturePath::Direct,
            binding: used,
            truncated: 0,
            cleanup: released.cleanup,
        })
    }

    fn run_legacy(&mut self, cap: Capability, route: Route, text: &str) -> Result<CommandOutcome> {
        if route == Route::AuthorizedProcessor {
            return Err(TsoError::InvalidCommand {
                reason: "authorized commands need direct capture".to_string(),
            });
        }
        let invocation = self.legacy.run(&mut self.link, cap, text)?;
        Ok(CommandOutcome {
            invocation,
            path: CapturePath::Legacy,
            binding: None,
            truncated: 0,
            cleanup: None,
        })
    }

    /// Allocate a DD that stays live until freed or the context exits.
    pub fn allocate(&mut self, spec: &AllocSpec) -> Result<(BindingName, AllocationResult)> {
        let cap = self.initialize()?;
        self.alloc.allocate_spec(&mut self.link, cap, spec)
    }

    /// Free a DD allocated through this context.
    pub fn free(&mut self, name: &BindingName) -> Result<AllocationResult> {
        if !self.alloc.is_live(name) {
            return Err(TsoError::NotAllocated {
                name: name.to_string(),
            });
        }
        let cap = self.initialize()?;
        self.alloc.free(&mut self.link, cap, name)
    }

    /// Free every live binding; failures are also kept for
    /// [`TsoContext::take_cleanup_failures`].
    pub fn release_all(&mut self) -> Vec<TsoError> {
        if self.alloc.live().next().is_none() {
            return Vec::new();
        }
        let cap = match self.initialize() {
            Ok(cap) => cap,
            Err(e) => return vec![e],
        };
        let failures = cleanup::release_all(&mut self.alloc, &mut self.link, cap);
        self.cleanup_failures.extend(failures.iter().cloned());
        failures
    }

    /// Write a line to the terminal.
    pub fn message(&mut self, text: &str, level: MessageLevel) -> Result<()> {
        self.link.host_mut().putline(text, level)
    }

    /// Cleanup failures recorded since the last call.
    pub fn take_cleanup_failures(&mut self) -> Vec<TsoError> {
        std::mem::take(&mut self.cleanup_failures)
    }

    pub fn live_bindings(&self) -> impl Iterator<Item = &BindingName> {
        self.alloc.live()
    }

    pub fn config(&self) -> &TsoConfig {
        &self.config
    }

    pub fn legacy(&self) -> &LegacyCapture {
        &self.legacy
    }

    pub fn host(&self) -> &H {
        self.link.host()
    }

    pub fn host_mut(&mut self) -> &mut H {
        self.link.host_mut()
    }

    pub fn linkage(&self) -> &Linkage<H> {
        &self.link
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::SimHost;

    fn context(host: SimHost, config: &str) -> TsoContext<SimHost> {
        TsoContext::new(host, TsoConfig::parse(config).unwrap())
    }

    fn captured() -> CommandOptions {
        CommandOptions {
            capture: Some(true),
            ..Default::default()
        }
    }

    #[test]
    fn direct_capture_frees_its_dd() {
        let mut ctx = context(SimHost::new(), "");
        let out = ctx.run_command("SEND 'hello'", captured()).unwrap();
        assert_eq!(out.path, CapturePath::Direct);
        assert_eq!(out.lines(), ["hello"]);
        let dd = out.binding.unwrap();
        assert!(ctx.host().dd_table().lookup(dd.as_str()).is_none());
        assert_eq!(ctx.live_bindings().count(), 0);
    }

    #[test]
    fn uncaptured_goes_to_terminal() {
        let mut ctx = context(SimHost::new(), "tso.cmd.capture.default = false");
        let out = ctx.run_command("SEND 'hi'", CommandOptions::default()).unwrap();
        assert_eq!(out.path, CapturePath::Uncaptured);
        assert!(out.lines().is_empty());
        assert_eq!(ctx.host().terminal().last().unwrap().1, "hi");
        assert_eq!(ctx.host().call_count("TSODALC"), 0);
    }

    #[test]
    fn policy_denies_before_any_host_call() {
        let mut ctx = context(
            SimHost::new(),
            "allow.tso.cmd = whitelist\ntso.cmd.whitelist = TIME",
        );
        let err = ctx.run_command("LISTCAT", captured()).unwrap_err();
        assert_eq!(
            err,
            TsoError::PolicyDenied {
                command: "LISTCAT".to_string()
            }
        );
        assert_eq!(ctx.probe_count(), 0);
    }

    #[test]
    fn line_limit_truncates() {
        let mut ctx = context(SimHost::new(), "limits.output.lines = 1");
        let out = ctx.run_command("LISTCAT LEVEL(NOSUCH)", captured()).unwrap();
        assert_eq!(out.lines().len(), 1);
        assert_eq!(out.truncated, 2);
    }

    #[test]
    fn auto_falls_back_without_dair_calls() {
        let host = SimHost::builder().without_module("IKJEFTSR").build();
        let mut ctx = context(host, "tso.cmd.mode = auto");
        let out = ctx.run_command("TIME", captured()).unwrap();
        assert_eq!(out.path, CapturePath::Legacy);
        assert!(out.lines()[0].starts_with("IKJ56650I"));
        assert_eq!(ctx.host().call_count("TSODALC"), 0);
    }

    #[test]
    fn direct_mode_does_not_fall_back() {
        let host = SimHost::builder().without_module("IKJEFTSR").build();
        let mut ctx = context(host, "");
        assert!(matches!(
            ctx.run_command("TIME", captured()),
            Err(TsoError::ServiceUnavailable { .. })
        ));
        assert_eq!(ctx.host().call_count("IRXEXEC"), 0);
    }

    #[test]
    fn free_of_unknown_name_is_an_error() {
        let mut ctx = context(SimHost::new(), "");
        let name = BindingName::new("X").unwrap();
        assert!(matches!(ctx.free(&name), Err(TsoError::NotAllocated { .. })));
        assert_eq!(ctx.probe_count(), 0);
    }
}
