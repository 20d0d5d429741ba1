//! TSO/E command execution for LUAZ scripts.
//!
//! This crate runs TSO commands on behalf of a script and hands back their
//! return code and output lines, providing:
//!
//! - **Environment Prober**: establishes the TSO environment once per context (IKJTSOEV)
//! - **Allocation Manager**: unique DD names, DAIR allocate/free (TSODALC/TSODFRE)
//! - **Command Invoker**: IKJEFTSI prepare, IKJEFTSR/TSOEFTR execute
//! - **Output Reader**: record input with stream fallback, offset cursor
//! - **Cleanup**: exactly one free per allocation, failures reported beside results
//! - **Legacy Capture**: IRXEXEC through the LUTSO exec and a shared output DD
//! - **Script Surface**: `tso.cmd`, `tso.alloc`, `tso.free`, `tso.msg`, `tso.exit`
//! - **Configuration**: command policy, capture mode, output limits
//!
//! [`emulator::SimHost`] provides the host services in-process.

#![forbid(unsafe_code)]

pub mod abi;
pub mod alloc;
pub mod cleanup;
pub mod config;
pub mod context;
pub mod ebcdic;
pub mod emulator;
pub mod error;
pub mod host;
pub mod invoke;
pub mod legacy;
pub mod linkage;
pub mod operands;
pub mod probe;
pub mod reader;
pub mod script;

pub use alloc::{AllocSpec, AllocationManager, AllocationResult, BindingName};
pub use config::{CaptureMode, CommandPolicy, PolicyMode, TraceLevel, TsoConfig};
pub use context::{CapturePath, CommandOptions, CommandOutcome, TsoContext};
pub use emulator::{DdnameReply, SimHost, SimHostBuilder};
pub use error::{Result, TsoError};
pub use host::{EntryPoint, HostServices, MessageLevel, RecordSource};
pub use invoke::{AbendCode, InvocationOutcome, InvocationState, Phase, Route};
pub use probe::{Capability, EnvState, EnvironmentProber};
pub use script::{CmdResult, ExitRequest, ScriptError, TsoScript};
