//! Command invoker: the IKJEFTSI/IKJEFTSR protocol.
//!
//! An [`Invocation`] walks a fixed state machine:
//!
//! ```text
//! Idle -> Preparing -> Prepared -> Executing -> Succeeded
//!             |                        |
//!             +-> Failed               +-> Failed
//! ```
//!
//! Prepare obtains a 16-byte context token from IKJTSFI (or IKJEFTSI where
//! the former is not installed). Execute passes the token, the command
//! text, the CPPL and the output DD to IKJEFTSR, or to TSOEFTR for commands
//! that must run authorized. Execute is never attempted unless prepare
//! succeeded.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::abi::eftsr::{self, CallBlock, EftsrFlags, TOKEN_SIZE};
use crate::abi::storage::SUBPOOL_ENGINE;
use crate::alloc::BindingName;
use crate::error::{Result, TsoError};
use crate::host::{EntryPoint, HostServices};
use crate::linkage::Linkage;
use crate::probe::Capability;

/// Marker the authorized command processor expects in front of the text.
pub const AUTHORIZED_MARKER: &str = "LUZAUTH ";

/// Prepare modules, in order of preference.
pub const PREPARE_MODULES: &[&str] = &["IKJTSFI", "IKJEFTSI"];

/// Which of the two protocol calls failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Prepare,
    Execute,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Prepare => f.write_str("IKJEFTSI prepare"),
            Phase::Execute => f.write_str("IKJEFTSR execute"),
        }
    }
}

/// Progress of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationState {
    Idle,
    Preparing,
    Prepared,
    Executing,
    Succeeded,
    Failed,
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Prepared => "prepared",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Execute service used for the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// IKJEFTSR, unauthorized.
    Standard,
    /// TSOEFTR, authorized, marker-prefixed text.
    AuthorizedProcessor,
}

impl Route {
    pub fn module(self) -> &'static str {
        match self {
            Route::Standard => "IKJEFTSR",
            Route::AuthorizedProcessor => "TSOEFTR",
        }
    }

    fn flags(self) -> EftsrFlags {
        match self {
            Route::Standard => EftsrFlags::command(),
            Route::AuthorizedProcessor => EftsrFlags::authorized_command(),
        }
    }
}

/// ABEND completion code, decoded from the abend word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AbendCode {
    /// System ABEND code (e.g. 0C4).
    System(u16),
    /// User ABEND code (0-4095).
    User(u16),
}

impl AbendCode {
    /// Decode a completion code word: system code in bits 8-19, user code
    /// in bits 20-31. Zero means no ABEND.
    pub fn from_word(word: u32) -> Option<Self> {
        let system = ((word >> 12) & 0xFFF) as u16;
        let user = (word & 0xFFF) as u16;
        if system != 0 {
            Some(Self::System(system))
        } else if user != 0 {
            Some(Self::User(user))
        } else {
            None
        }
    }
}

impl fmt::Display for AbendCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbendCode::System(code) => write!(f, "S{code:03X}"),
            AbendCode::User(code) => write!(f, "U{code:04}"),
        }
    }
}

/// What a completed command returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationOutcome {
    /// R15 of the execute service (0, or 4 when the command rc is nonzero).
    pub service_rc: i32,
    pub command_rc: i32,
    pub reason_code: u32,
    pub abend_code: u32,
    /// Captured output, filled in by the reader.
    pub lines: Vec<String>,
}

impl InvocationOutcome {
    pub fn abend(&self) -> Option<AbendCode> {
        AbendCode::from_word(self.abend_code)
    }
}

/// One command going through prepare and execute.
#[derive(Debug)]
pub struct Invocation {
    route: Route,
    text: String,
    outdd: Option<BindingName>,
    state: InvocationState,
    token: Option<[u8; TOKEN_SIZE]>,
}

impl Invocation {
    /// Validate `command` and build the text the execute service receives.
    pub fn new(route: Route, command: &str, outdd: Option<&BindingName>) -> Result<Self> {
        let command = command.trim();
        if command.is_empty() {
            return Err(TsoError::InvalidCommand {
                reason: "command text is empty".to_string(),
            });
        }
        let text = match route {
            Route::Standard => command.to_string(),
            Route::AuthorizedProcessor => format!("{AUTHORIZED_MARKER}{command}"),
        };
        if text.len() > eftsr::MAX_COMMAND_LEN {
            return Err(TsoError::InvalidCommand {
                reason: format!(
                    "command is {} bytes, limit is {}",
                    text.len(),
                    eftsr::MAX_COMMAND_LEN
                ),
            });
        }
        Ok(Self {
            route,
            text,
            outdd: outdd.cloned(),
            state: InvocationState::Idle,
            token: None,
        })
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn route(&self) -> Route {
        self.route
    }

    fn advance(&mut self, to: InvocationState) -> Result<()> {
        use InvocationState::*;
        let allowed = matches!(
            (self.state, to),
            (Idle, Preparing)
                | (Preparing, Prepared)
                | (Preparing, Failed)
                | (Prepared, Executing)
                | (Executing, Succeeded)
                | (Executing, Failed)
        );
        if !allowed {
            return Err(TsoError::InvalidState {
                from: self.state,
                to,
            });
        }
        debug!(from = %self.state, %to, "invocation");
        self.state = to;
        Ok(())
    }

    /// Obtain the context token.
    pub fn prepare<H: HostServices>(&mut self, link: &mut Linkage<H>) -> Result<()> {
        self.advance(InvocationState::Preparing)?;
        let outcome = resolve(link, self.route).and_then(|(prepare, _)| call_prepare(link, &prepare));
        match outcome {
            Ok(token) => {
                self.token = Some(token);
                self.advance(InvocationState::Prepared)
            }
            Err(e) => {
                self.advance(InvocationState::Failed)?;
                Err(e)
            }
        }
    }

    /// Run the command; requires a successful [`Invocation::prepare`].
    pub fn execute<H: HostServices>(
        &mut self,
        link: &mut Linkage<H>,
        cap: Capability,
    ) -> Result<InvocationOutcome> {
        self.advance(InvocationState::Executing)?;
        let outcome = self.call_execute(link, cap);
        match &outcome {
            Ok(o) => {
                self.advance(InvocationState::Succeeded)?;
                info!(
                    module = self.route.module(),
                    outdd = ?self.outdd.as_ref().map(BindingName::as_str),
                    service_rc = o.service_rc,
                    command_rc = o.command_rc,
                    "command complete"
                );
            }
            Err(e) => {
                self.advance(InvocationState::Failed)?;
                warn!(module = self.route.module(), error = %e, "command failed");
            }
        }
        outcome
    }

    fn call_execute<H: HostServices>(
        &self,
        link: &mut Linkage<H>,
        cap: Capability,
    ) -> Result<InvocationOutcome> {
        let token = self.token.ok_or(TsoError::InvalidState {
            from: InvocationState::Idle,
            to: InvocationState::Executing,
        })?;
        let entry = link.fetch(self.route.module())?;
        let mut block = CallBlock::new(self.route.flags(), &self.text, token)?;
        if let Some(dd) = &self.outdd {
            block = block.with_outdd(dd.as_str());
        }

        let (r15, result) = link.scoped(|link| {
            let image = block.encode()?;
            let base = link.storage_mut().getmain_with(SUBPOOL_ENGINE, &image)?;
            let r15 = link.call(&entry, &block.parms(base, cap.cppl()))?;
            let result = eftsr::decode_call(link.storage().read(base, block.size())?)?;
            Ok((r15, result))
        })?;

        if r15 != eftsr::RC_OK && r15 != eftsr::RC_FUNCTION_RC {
            return Err(TsoError::InvocationFailed {
                phase: Phase::Execute,
                rc: r15,
                reason: result.reason,
                abend: result.abend,
            });
        }
        Ok(InvocationOutcome {
            service_rc: r15,
            command_rc: result.command_rc,
            reason_code: result.reason,
            abend_code: result.abend,
            lines: Vec::new(),
        })
    }
}

/// Resolve the prepare and execute entry points for `route`.
pub fn resolve<H: HostServices>(
    link: &mut Linkage<H>,
    route: Route,
) -> Result<(EntryPoint, EntryPoint)> {
    let prepare = link.fetch_first(PREPARE_MODULES)?;
    let execute = link.fetch(route.module())?;
    Ok((prepare, execute))
}

fn call_prepare<H: HostServices>(
    link: &mut Linkage<H>,
    entry: &EntryPoint,
) -> Result<[u8; TOKEN_SIZE]> {
    let (r15, result) = link.scoped(|link| {
        let base = link.storage_mut().getmain(SUBPOOL_ENGINE, eftsr::si::SIZE)?;
        let r15 = link.call(entry, &eftsr::si_parms(base))?;
        let result = eftsr::decode_si(link.storage().read(base, eftsr::si::SIZE)?)?;
        Ok((r15, result))
    })?;
    if r15 != 0 || result.error != 0 || result.abend != 0 {
        return Err(TsoError::InvocationFailed {
            phase: Phase::Prepare,
            rc: if result.error != 0 { result.error } else { r15 },
            reason: result.reason,
            abend: result.abend,
        });
    }
    Ok(result.token)
}

/// Prepare and execute `command` through IKJEFTSR.
pub fn invoke<H: HostServices>(
    link: &mut Linkage<H>,
    cap: Capability,
    command: &str,
    binding: Option<&BindingName>,
) -> Result<InvocationOutcome> {
    run(link, cap, Route::Standard, command, binding)
}

/// Prepare and execute `command` through the authorized command processor.
pub fn invoke_via_authorized_processor<H: HostServices>(
    link: &mut Linkage<H>,
    cap: Capability,
    command: &str,
    binding: Option<&BindingName>,
) -> Result<InvocationOutcome> {
    run(link, cap, Route::AuthorizedProcessor, command, binding)
}

pub(crate) fn run<H: HostServices>(
    link: &mut Linkage<H>,
    cap: Capability,
    route: Route,
    command: &str,
    binding: Option<&BindingName>,
) -> Result<InvocationOutcome> {
    let mut invocation = Invocation::new(route, command, binding)?;
    invocation.prepare(link)?;
    invocation.execute(link, cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::AllocationManager;
    use crate::emulator::SimHost;
    use crate::probe::EnvironmentProber;

    fn ready(host: SimHost) -> (Linkage<SimHost>, Capability) {
        let mut link = Linkage::new(host);
        let cap = EnvironmentProber::new().initialize(&mut link).unwrap();
        (link, cap)
    }

    #[test]
    fn abend_codes() {
        assert_eq!(AbendCode::from_word(0x000C_4000), Some(AbendCode::System(0x0C4)));
        assert_eq!(AbendCode::from_word(100), Some(AbendCode::User(100)));
        assert_eq!(AbendCode::from_word(0), None);
        assert_eq!(AbendCode::System(0x0C4).to_string(), "S0C4");
        assert_eq!(AbendCode::User(100).to_string(), "U0100");
    }

    #[test]
    fn state_machine_success() {
        let (mut link, cap) = ready(SimHost::new());
        let mut inv = Invocation::new(Route::Standard, "TIME", None).unwrap();
        assert_eq!(inv.state(), InvocationState::Idle);
        inv.prepare(&mut link).unwrap();
        assert_eq!(inv.state(), InvocationState::Prepared);
        let outcome = inv.execute(&mut link, cap).unwrap();
        assert_eq!(inv.state(), InvocationState::Succeeded);
        assert_eq!(outcome.service_rc, 0);
        assert_eq!(outcome.command_rc, 0);
        // no output DD: the line goes to the terminal
        assert!(link.host().terminal()[0].1.starts_with("IKJ56650I TIME-"));
    }

    #[test]
    fn execute_before_prepare_is_rejected() {
        let (mut link, cap) = ready(SimHost::new());
        let mut inv = Invocation::new(Route::Standard, "TIME", None).unwrap();
        assert!(matches!(
            inv.execute(&mut link, cap),
            Err(TsoError::InvalidState { .. })
        ));
        assert_eq!(link.host().call_count("IKJEFTSR"), 0);
    }

    #[test]
    fn failed_prepare_never_executes() {
        let (mut link, cap) = ready(SimHost::builder().prepare_error(8, 0x30).build());
        let err = invoke(&mut link, cap, "TIME", None).unwrap_err();
        assert_eq!(
            err,
            TsoError::InvocationFailed {
                phase: Phase::Prepare,
                rc: 8,
                reason: 0x30,
                abend: 0
            }
        );
        assert_eq!(link.host().call_count("IKJEFTSR"), 0);
    }

    #[test]
    fn prefers_ikjtsfi_when_installed() {
        let (mut link, cap) = ready(SimHost::builder().with_module("IKJTSFI").build());
        invoke(&mut link, cap, "TIME", None).unwrap();
        assert_eq!(link.host().call_count("IKJTSFI"), 1);
        assert_eq!(link.host().call_count("IKJEFTSI"), 0);
    }

    #[test]
    fn nonzero_command_rc_is_service_rc_4() {
        let (mut link, cap) = ready(SimHost::new());
        let outcome = invoke(&mut link, cap, "LISTCAT LEVEL(NOSUCH)", None).unwrap();
        assert_eq!(outcome.service_rc, 4);
        assert_eq!(outcome.command_rc, 4);
    }

    #[test]
    fn authcmd_needs_authorized_route() {
        let (mut link, cap) = ready(SimHost::new());
        let err = invoke(&mut link, cap, "PARMLIB LIST", None).unwrap_err();
        assert!(matches!(
            err,
            TsoError::InvocationFailed {
                phase: Phase::Execute,
                rc: 20,
                ..
            }
        ));
        let outcome = invoke_via_authorized_processor(&mut link, cap, "PARMLIB LIST", None).unwrap();
        assert_eq!(outcome.command_rc, 0);
        assert_eq!(link.host().call_count("TSOEFTR"), 1);
    }

    #[test]
    fn output_goes_to_binding() {
        let (mut link, cap) = ready(SimHost::new());
        let mut alloc = AllocationManager::new();
        let (dd, _) = alloc.allocate(&mut link, cap, None).unwrap();
        invoke(&mut link, cap, "SEND 'hi'", Some(&dd)).unwrap();
        assert!(link.host().terminal().is_empty());
        alloc.free(&mut link, cap, &dd).unwrap();
    }

    #[test]
    fn missing_execute_module_fails_before_prepare() {
        let (mut link, cap) = ready(SimHost::builder().without_module("IKJEFTSR").build());
        let err = invoke(&mut link, cap, "TIME", None).unwrap_err();
        assert_eq!(
            err,
            TsoError::ServiceUnavailable {
                module: "IKJEFTSR".to_string()
            }
        );
        assert_eq!(link.host().call_count("IKJEFTSI"), 0);
    }

    #[test]
    fn empty_command_rejected() {
        assert!(matches!(
            Invocation::new(Route::Standard, "   ", None),
            Err(TsoError::InvalidCommand { .. })
        ));
    }
}
