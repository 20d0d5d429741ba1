//! Engine error types.

use miette::Diagnostic;
use thiserror::Error;

use crate::invoke::{InvocationState, Phase};

/// Errors returned by the TSO command-execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum TsoError {
    /// The privileged TSO environment could not be established.
    #[error("TSO environment unavailable: IKJTSOEV rc={rc}, reason={reason:#x}, abend={abend:#x}")]
    #[diagnostic(code(luaz::environment_unavailable))]
    EnvironmentUnavailable { rc: i32, reason: u32, abend: u32 },

    /// A host service entry point could not be resolved.
    #[error("host service {module} is not available")]
    #[diagnostic(
        code(luaz::service_unavailable),
        help("module resolution failures are cached for the life of the context")
    )]
    ServiceUnavailable { module: String },

    /// DAIR allocation or free returned a failure.
    #[error(
        "DAIR failed for {ddname}: rc={rc}, darc={reason:#06x}, ctrc={catalog_rc:#06x}, flags={flags:#04x}"
    )]
    #[diagnostic(code(luaz::allocation_failed))]
    AllocationFailed {
        ddname: String,
        rc: i32,
        reason: u16,
        catalog_rc: u16,
        flags: u8,
    },

    /// DAIR allocated but handed back a DDname that cannot be bound.
    #[error("DAIR assigned unusable DDname '{assigned}' for {requested}: rc={rc}, darc={reason:#06x}, ctrc={catalog_rc:#06x}")]
    #[diagnostic(code(luaz::unusable_ddname))]
    UnusableDdname {
        requested: String,
        assigned: String,
        rc: i32,
        reason: u16,
        catalog_rc: u16,
    },

    /// The binding is not live in this context.
    #[error("DDname {name} is not allocated by this session")]
    #[diagnostic(code(luaz::not_allocated))]
    NotAllocated { name: String },

    /// A DD or dataset name failed validation.
    #[error("invalid name '{name}': {reason}")]
    #[diagnostic(code(luaz::invalid_name))]
    InvalidName { name: String, reason: String },

    /// Command text cannot be submitted.
    #[error("invalid command: {reason}")]
    #[diagnostic(code(luaz::invalid_command))]
    InvalidCommand { reason: String },

    /// IKJEFTSI/IKJEFTSR reported a service failure.
    #[error("{phase} failed: rc={rc}, reason={reason:#x}, abend={abend:#x}")]
    #[diagnostic(code(luaz::invocation_failed))]
    InvocationFailed {
        phase: Phase,
        rc: i32,
        reason: u32,
        abend: u32,
    },

    /// An invocation step was attempted out of order.
    #[error("invocation cannot move from {from} to {to}")]
    #[diagnostic(code(luaz::invalid_state))]
    InvalidState {
        from: InvocationState,
        to: InvocationState,
    },

    /// Captured output could not be read back.
    #[error("read of DD {ddname} failed: {detail}")]
    #[diagnostic(code(luaz::read_failed))]
    ReadFailed { ddname: String, detail: String },

    /// The interpreter's EVALBLK did not hold a well-formed number.
    #[error("EVALBLK result is not a number: {detail}")]
    #[diagnostic(code(luaz::eval_parse_failed))]
    EvalParseFailed { detail: String },

    /// DAIR free after a command failed.
    #[error("cleanup of {ddname} failed: rc={rc}, darc={reason:#06x}, ctrc={catalog_rc:#06x}")]
    #[diagnostic(code(luaz::cleanup_failed), severity(Warning))]
    CleanupFailed {
        ddname: String,
        rc: i32,
        reason: u16,
        catalog_rc: u16,
    },

    /// Command rejected by the configured command policy.
    #[error("command {command} is not permitted by policy")]
    #[diagnostic(code(luaz::policy_denied))]
    PolicyDenied { command: String },

    /// GETMAIN could not satisfy a request.
    #[error("GETMAIN failed: length={length}, {reason}")]
    #[diagnostic(code(luaz::getmain_failed))]
    GetmainFailed { length: usize, reason: String },

    /// FREEMAIN of an address that is not the start of an owned area.
    #[error("FREEMAIN failed: address {address:#010x} not owned")]
    #[diagnostic(code(luaz::freemain_failed))]
    FreemainFailed { address: u32 },

    /// Reference outside any owned storage area.
    #[error("addressing exception at {address:#010x} (length {length})")]
    #[diagnostic(code(luaz::address_fault))]
    AddressFault { address: u32, length: usize },

    /// Fixed-offset field does not fit the buffer.
    #[error("field at offset {offset} width {width} overruns buffer of {len} bytes")]
    #[diagnostic(code(luaz::buffer_overrun))]
    BufferOverrun {
        offset: usize,
        width: usize,
        len: usize,
    },

    /// Parameter list malformed or not terminated.
    #[error("invalid parameter list: {reason}")]
    #[diagnostic(code(luaz::invalid_plist))]
    InvalidParmList { reason: String },

    /// Configuration text could not be parsed.
    #[error("LUZ{code:05} config line {line}: {detail}")]
    #[diagnostic(code(luaz::config))]
    Config { code: u32, line: usize, detail: String },
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, TsoError>;
