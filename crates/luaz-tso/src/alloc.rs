//! Allocation manager: private output DDs through TSODALC/TSODFRE.
//!
//! Each captured command gets its own DD bound to a temporary dataset. Names
//! come from a context-local counter (`LUZ` + five base-36 digits); the
//! host's answer in the work area is authoritative for the name actually
//! assigned. An answer that is not a valid DDname is released again and
//! reported as an error. A binding is freed exactly once: after its free
//! attempt it leaves the live set whatever the host answered.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::abi::dair::{self, DatasetStatus, WORK_SIZE};
use crate::abi::storage::SUBPOOL_ENGINE;
use crate::abi::{Last, ParmList};
use crate::ebcdic;
use crate::error::{Result, TsoError};
use crate::host::HostServices;
use crate::linkage::Linkage;
use crate::operands::parse_operand_list;
use crate::probe::Capability;

/// Prefix of generated binding names.
pub const NAME_PREFIX: &str = "LUZ";

const NAME_DIGITS: u32 = 5;
const NAME_SPACE: u32 = 36u32.pow(NAME_DIGITS);
const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Decoded results of one DAIR request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationResult {
    /// DAIR return code (R15 of the DAIR call, stored by the wrapper).
    pub service_rc: i32,
    /// DYNALLOC error code (DARC).
    pub reason_code: u16,
    /// Catalog return code (CTRC).
    pub catalog_rc: u16,
    /// Secondary flag byte of the request block.
    pub secondary_flags: u8,
    /// DDname as left in the request block by the host.
    pub assigned_name: String,
}

impl AllocationResult {
    pub fn succeeded(&self) -> bool {
        self.service_rc == 0 && self.reason_code == 0
    }
}

/// A validated, uppercased DDname.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct BindingName(String);

impl BindingName {
    pub fn new(name: &str) -> Result<Self> {
        validate_ddname(name)?;
        Ok(Self(name.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BindingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BindingName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate a DDname (1-8 characters, first alphabetic or national).
pub fn validate_ddname(name: &str) -> Result<()> {
    let invalid = |reason: String| TsoError::InvalidName {
        name: name.to_string(),
        reason,
    };
    let Some(first) = name.chars().next() else {
        return Err(invalid("must be 1-8 characters".to_string()));
    };
    if name.len() > 8 {
        return Err(invalid("must be 1-8 characters".to_string()));
    }
    if !first.is_ascii_alphabetic() && !is_national(first) {
        return Err(invalid(
            "must start with a letter or national character (@#$)".to_string(),
        ));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !is_national(*c))
    {
        return Err(invalid(format!("invalid character '{ch}'")));
    }
    Ok(())
}

/// Validate a dataset name (1-44 characters, qualifiers of 1-8).
pub fn validate_dsname(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 44 {
        return Err(TsoError::InvalidName {
            name: name.to_string(),
            reason: "must be 1-44 characters".to_string(),
        });
    }
    for qualifier in name.split('.') {
        if let Err(TsoError::InvalidName { reason, .. }) = validate_ddname(qualifier) {
            return Err(TsoError::InvalidName {
                name: name.to_string(),
                reason: format!("qualifier '{qualifier}' {reason}"),
            });
        }
    }
    Ok(())
}

fn is_national(c: char) -> bool {
    matches!(c, '@' | '#' | '$')
}

/// Monotonic generator of `LUZnnnnn` names.
///
/// The all-zero value is never produced; past `LUZZZZZZ` the counter wraps
/// back to 1.
#[derive(Debug, Clone)]
pub struct NameGenerator {
    counter: u32,
}

impl NameGenerator {
    pub fn new() -> Self {
        Self { counter: 1 }
    }

    /// Start from an explicit counter value (0 is treated as 1).
    pub fn starting_at(counter: u32) -> Self {
        Self {
            counter: if counter == 0 || counter >= NAME_SPACE { 1 } else { counter },
        }
    }

    pub fn next_name(&mut self) -> BindingName {
        let value = self.counter;
        self.counter = if value + 1 >= NAME_SPACE { 1 } else { value + 1 };
        let mut digits = [b'0'; NAME_DIGITS as usize];
        let mut rest = value;
        for slot in digits.iter_mut().rev() {
            *slot = BASE36[(rest % 36) as usize];
            rest /= 36;
        }
        let suffix: String = digits.iter().map(|&b| b as char).collect();
        BindingName(format!("{NAME_PREFIX}{suffix}"))
    }
}

impl Default for NameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// A script-level allocation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocSpec {
    /// Requested DDname; generated when absent.
    pub ddname: Option<String>,
    /// Existing dataset to bind; a temporary dataset when absent.
    pub dsname: Option<String>,
    pub status: DatasetStatus,
}

impl AllocSpec {
    /// A temporary dataset under a generated or hinted name.
    pub fn temporary(ddname: Option<&str>) -> Self {
        Self {
            ddname: ddname.map(str::to_ascii_uppercase),
            dsname: None,
            status: DatasetStatus::New,
        }
    }

    /// Parse TSO-style operands: `X`, `FILE(X) DA('A.B') SHR`, `DD(X),NEW`.
    pub fn parse(spec: &str) -> Result<Self> {
        let ops = parse_operand_list(spec);
        let keyword_dd = ops.keyword(&["FILE", "F", "DDNAME", "DD"]);
        let ddname = match (keyword_dd, ops.positional.as_slice()) {
            (Some(dd), []) => dd.to_string(),
            (None, [dd]) => dd.clone(),
            (None, []) => {
                return Err(TsoError::InvalidCommand {
                    reason: "allocation needs a DDname".to_string(),
                })
            }
            _ => {
                return Err(TsoError::InvalidCommand {
                    reason: format!("ambiguous allocation operands '{}'", spec.trim()),
                })
            }
        };
        validate_ddname(&ddname)?;

        let dsname = ops
            .keyword(&["DATASET", "DSNAME", "DSN", "DA"])
            .map(str::to_ascii_uppercase);
        if let Some(dsn) = &dsname {
            validate_dsname(dsn)?;
        }

        let recognised = ["FILE", "F", "DDNAME", "DD", "DATASET", "DSNAME", "DSN", "DA"];
        if let Some(key) = ops.keywords.keys().find(|k| !recognised.contains(&k.as_str())) {
            return Err(TsoError::InvalidCommand {
                reason: format!("unsupported allocation keyword {key}"),
            });
        }

        let mut status = None;
        for flag in &ops.flags {
            let parsed = match flag.as_str() {
                "SHR" => DatasetStatus::Shr,
                "OLD" => DatasetStatus::Old,
                "NEW" => DatasetStatus::New,
                "MOD" => DatasetStatus::Mod,
                other => {
                    return Err(TsoError::InvalidCommand {
                        reason: format!("unsupported allocation operand {other}"),
                    })
                }
            };
            if status.replace(parsed).is_some() {
                return Err(TsoError::InvalidCommand {
                    reason: "more than one dataset status".to_string(),
                });
            }
        }
        let default = if dsname.is_some() {
            DatasetStatus::Shr
        } else {
            DatasetStatus::New
        };

        Ok(Self {
            ddname: Some(ddname),
            dsname,
            status: status.unwrap_or(default),
        })
    }
}

/// Parse a FREE operand: `X` or `FILE(X)`.
pub fn parse_free_spec(spec: &str) -> Result<BindingName> {
    let ops = parse_operand_list(spec);
    let name = match (ops.keyword(&["FILE", "F", "DDNAME", "DD"]), ops.positional.as_slice()) {
        (Some(dd), []) => dd.to_string(),
        (None, [dd]) => dd.clone(),
        _ => {
            return Err(TsoError::InvalidCommand {
                reason: format!("FREE needs exactly one DDname, got '{}'", spec.trim()),
            })
        }
    };
    BindingName::new(&name)
}

/// Live bindings and the name counter for one context.
#[derive(Debug, Default)]
pub struct AllocationManager {
    names: NameGenerator,
    live: BTreeSet<BindingName>,
}

impl AllocationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generator(names: NameGenerator) -> Self {
        Self {
            names,
            live: BTreeSet::new(),
        }
    }

    /// Allocate a temporary output DD, named from `hint` or the counter.
    pub fn allocate<H: HostServices>(
        &mut self,
        link: &mut Linkage<H>,
        cap: Capability,
        hint: Option<&str>,
    ) -> Result<(BindingName, AllocationResult)> {
        self.allocate_spec(link, cap, &AllocSpec::temporary(hint))
    }

    /// Allocate per `spec`; returns the name the host actually assigned.
    pub fn allocate_spec<H: HostServices>(
        &mut self,
        link: &mut Linkage<H>,
        cap: Capability,
        spec: &AllocSpec,
    ) -> Result<(BindingName, AllocationResult)> {
        let requested = match &spec.ddname {
            Some(name) => BindingName::new(name)?,
            None => self.fresh_name(),
        };
        let entry = link.fetch("TSODALC")?;

        let result = link.scoped(|link| {
            let storage = link.storage_mut();
            let work = storage.getmain(SUBPOOL_ENGINE, WORK_SIZE)?;
            let ddname = storage.getmain_with(SUBPOOL_ENGINE, &ebcdic::encode_padded(requested.as_str(), 8))?;
            let dair_rc = storage.getmain(SUBPOOL_ENGINE, 4)?;
            let cat_rc = storage.getmain(SUBPOOL_ENGINE, 4)?;

            let mut image = vec![0u8; WORK_SIZE];
            dair::prepare_allocate(
                &mut image,
                work,
                requested.as_str(),
                spec.dsname.as_deref(),
                spec.status,
            )?;
            storage.write(work, &image)?;

            let parms = ParmList::new(&[cap.cppl(), ddname, dair_rc, cat_rc], Last(work));
            let r15 = link.call(&entry, &parms)?;
            let mut result = dair::decode_allocate(link.storage().read(work, WORK_SIZE)?)?;
            if result.service_rc == 0 && r15 != 0 {
                result.service_rc = r15;
            }
            Ok(result)
        })?;

        if !result.succeeded() {
            warn!(
                ddname = %requested,
                rc = result.service_rc,
                darc = format_args!("{:#06x}", result.reason_code),
                ctrc = format_args!("{:#06x}", result.catalog_rc),
                "TSODALC failed"
            );
            return Err(TsoError::AllocationFailed {
                ddname: requested.to_string(),
                rc: result.service_rc,
                reason: result.reason_code,
                catalog_rc: result.catalog_rc,
                flags: result.secondary_flags,
            });
        }

        let assigned = match BindingName::new(&result.assigned_name) {
            Ok(name) => name,
            Err(_) => {
                warn!(
                    ddname = %requested,
                    assigned = %result.assigned_name,
                    "TSODALC returned an unusable DDname"
                );
                release_unbound(link, cap, &requested, &result.assigned_name);
                return Err(TsoError::UnusableDdname {
                    requested: requested.to_string(),
                    assigned: result.assigned_name,
                    rc: result.service_rc,
                    reason: result.reason_code,
                    catalog_rc: result.catalog_rc,
                });
            }
        };
        info!(ddname = %assigned, dsname = ?spec.dsname, status = spec.status.keyword(), "allocated");
        self.live.insert(assigned.clone());
        Ok((assigned, result))
    }

    /// Free a live binding. Unknown or already-freed names fail without a
    /// host call.
    pub fn free<H: HostServices>(
        &mut self,
        link: &mut Linkage<H>,
        cap: Capability,
        name: &BindingName,
    ) -> Result<AllocationResult> {
        if !self.live.contains(name) {
            return Err(TsoError::NotAllocated {
                name: name.to_string(),
            });
        }
        link.fetch("TSODFRE")?;
        self.live.remove(name);

        let result = unallocate(link, cap, name.as_str())?;
        if !result.succeeded() {
            return Err(TsoError::AllocationFailed {
                ddname: name.to_string(),
                rc: result.service_rc,
                reason: result.reason_code,
                catalog_rc: result.catalog_rc,
                flags: result.secondary_flags,
            });
        }
        debug!(ddname = %name, "freed");
        Ok(result)
    }

    pub fn is_live(&self, name: &BindingName) -> bool {
        self.live.contains(name)
    }

    /// Live bindings in name order.
    pub fn live(&self) -> impl Iterator<Item = &BindingName> {
        self.live.iter()
    }

    fn fresh_name(&mut self) -> BindingName {
        // Bounded by the name space; a full set of live names is not reachable
        // in practice, the host would refuse first.
        for _ in 0..NAME_SPACE {
            let candidate = self.names.next_name();
            if !self.live.contains(&candidate) {
                return candidate;
            }
        }
        self.names.next_name()
    }
}

/// One TSODFRE call for `ddname`, decoded.
fn unallocate<H: HostServices>(
    link: &mut Linkage<H>,
    cap: Capability,
    ddname: &str,
) -> Result<AllocationResult> {
    let entry = link.fetch("TSODFRE")?;
    link.scoped(|link| {
        let storage = link.storage_mut();
        let work = storage.getmain(SUBPOOL_ENGINE, WORK_SIZE)?;
        let name = storage.getmain_with(SUBPOOL_ENGINE, &ebcdic::encode_padded(ddname, 8))?;
        let dair_rc = storage.getmain(SUBPOOL_ENGINE, 4)?;
        let cat_rc = storage.getmain(SUBPOOL_ENGINE, 4)?;

        let mut image = vec![0u8; WORK_SIZE];
        dair::prepare_free(&mut image, work, ddname)?;
        storage.write(work, &image)?;

        let parms = ParmList::new(&[cap.cppl(), name, dair_rc, cat_rc], Last(work));
        let r15 = link.call(&entry, &parms)?;
        let mut result = dair::decode_free(link.storage().read(work, WORK_SIZE)?)?;
        if result.service_rc == 0 && r15 != 0 {
            result.service_rc = r15;
        }
        Ok(result)
    })
}


/// Undo an allocation whose DDname could not be bound. The host's
/// answer is tried first, then the name that was requested.
fn release_unbound<H: HostServices>(
    link: &mut Linkage<H>,
    cap: Capability,
    requested: &BindingName,
    assigned: &str,
) {
    let mut candidates = Vec::with_capacity(2);
    if !assigned.is_empty() {
        candidates.push(assigned);
    }
    if !assigned.eq_ignore_ascii_case(requested.as_str()) {
        candidates.push(requested.as_str());
    }
    for ddname in candidates {
        match unallocate(link, cap, ddname) {
            Ok(result) if result.succeeded() => {
                debug!(%ddname, "released unbound allocation");
                return;
            }
            Ok(result) => {
                debug!(%ddname, rc = result.service_rc, darc = result.reason_code, "TSODFRE refused");
            }
            Err(e) => debug!(%ddname, error = %e, "TSODFRE failed"),
        }
    }
    warn!(ddname = %requested, assigned, "allocation could not be released");
}
