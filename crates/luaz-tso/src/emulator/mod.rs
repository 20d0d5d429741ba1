//! In-process host: emulates the TSO/E services the engine calls.
//!
//! [`SimHost`] implements [`HostServices`] with its own DD table, dataset
//! catalog and command processors, and services each entry point by
//! decoding the same parameter lists and control blocks a real system
//! would receive:
//!
//! - **IKJTSOEV**: environment probe, returns a CPPL
//! - **TSODALC/TSODFRE**: DAIR allocate/unallocate through the work area
//! - **IKJEFTSI/IKJTSFI**: prepare, issues a 16-byte token
//! - **IKJEFTSR/TSOEFTR**: run a command, output to the named DD
//! - **IRXEXEC**: run the LUTSO exec, append output to a shared stream DD
//!
//! Knobs on [`SimHostBuilder`] inject the failures the engine must handle.

pub mod catalog;
pub mod commands;
pub mod dd_table;
mod services;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Read};

use chrono::{Local, NaiveDateTime};
use tracing::{info, warn};

use crate::abi::dair::DatasetStatus;
use crate::abi::eftsr::TOKEN_SIZE;
use crate::abi::Storage;
use crate::error::{Result, TsoError};
use crate::host::{EntryPoint, HostServices, MessageLevel, RecordSource};

pub use catalog::{Catalog, Dataset, DatasetBody, OUTPUT_LRECL};
pub use commands::CommandResult;
pub use dd_table::{DdEntry, DdTable};

/// Modules available unless removed with [`SimHostBuilder::without_module`].
pub const DEFAULT_MODULES: &[&str] = &[
    "IKJTSOEV", "TSODALC", "TSODFRE", "IKJEFTSI", "IKJEFTSR", "TSOEFTR", "IRXEXEC",
];

/// Base address of the emulated module load area.
const MODULE_BASE: u32 = 0x0080_0000;

/// Environment probe outcome.
#[derive(Debug, Clone, Copy)]
struct ProbeConfig {
    rc: i32,
    reason: u32,
    abend: u32,
}

/// What TSODALC leaves in the DDN field of the DAPB08.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DdnameReply {
    /// Allocate under the requested DDname and echo it.
    #[default]
    Requested,
    /// Ignore the request; the DD table assigns a SYSnnnnn name.
    System,
    /// Allocate under the requested DDname but report this text instead.
    Overwrite(String),
}

/// Emulated TSO/E host.
#[derive(Debug)]
pub struct SimHost {
    userid: String,
    modules: BTreeMap<String, u32>,
    probe: ProbeConfig,
    cppl: Option<u32>,
    probe_count: usize,
    calls: HashMap<String, usize>,
    dd: DdTable,
    catalog: Catalog,
    record_access: bool,
    prepare_error: Option<(i32, u32)>,
    free_failure: Option<u16>,
    ddname_reply: DdnameReply,
    authcmd: Vec<String>,
    eval_override: Option<(i32, Vec<u8>)>,
    tokens: HashSet<[u8; TOKEN_SIZE]>,
    next_token: u32,
    temp_seq: u32,
    terminal: Vec<(MessageLevel, String)>,
    clock: Option<NaiveDateTime>,
    logon: NaiveDateTime,
}

impl SimHost {
    /// A host with default settings: user IBMUSER, every module present,
    /// SYSEXEC holding LUTSO and TSOOUT bound to a shared stream.
    pub fn new() -> Self {
        SimHostBuilder::new().build()
    }

    pub fn builder() -> SimHostBuilder {
        SimHostBuilder::new()
    }

    pub fn userid(&self) -> &str {
        &self.userid
    }

    /// Number of IKJTSOEV calls serviced.
    pub fn probe_count(&self) -> usize {
        self.probe_count
    }

    /// Number of calls serviced for `module`.
    pub fn call_count(&self, module: &str) -> usize {
        self.calls.get(&module.to_ascii_uppercase()).copied().unwrap_or(0)
    }

    /// Lines written to the terminal, oldest first.
    pub fn terminal(&self) -> &[(MessageLevel, String)] {
        &self.terminal
    }

    pub fn dd_table(&self) -> &DdTable {
        &self.dd
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Discard the contents of the stream dataset behind `ddname`, as when a
    /// shared log is switched to a new generation.
    pub fn rotate_stream(&mut self, ddname: &str) -> Result<()> {
        let dsname = self.dsname_for(ddname)?;
        if let Some(ds) = self.catalog.get_mut(&dsname) {
            ds.body = DatasetBody::Stream(Vec::new());
        }
        Ok(())
    }

    /// Append a raw line to the dataset behind `ddname`.
    pub fn append_to_dd(&mut self, ddname: &str, line: &str) -> Result<()> {
        let dsname = self.dsname_for(ddname)?;
        match self.catalog.get_mut(&dsname) {
            Some(ds) => {
                ds.append_line(line);
                Ok(())
            }
            None => Err(TsoError::ReadFailed {
                ddname: ddname.to_ascii_uppercase(),
                detail: format!("data set {dsname} not cataloged"),
            }),
        }
    }

    /// Bind `ddname` to a cataloged dataset, as a DD statement in the
    /// logon procedure would.
    pub fn define_dd(&mut self, ddname: &str, dsname: &str, status: DatasetStatus) -> Result<()> {
        self.dd
            .allocate(Some(ddname), dsname, status, false)
            .map(|_| ())
            .map_err(|e| TsoError::AllocationFailed {
                ddname: ddname.to_ascii_uppercase(),
                rc: crate::abi::dair::DAIR_RC_DYNALLOC_ERROR,
                reason: e.darc(),
                catalog_rc: 0,
                flags: 0,
            })
    }

    fn dsname_for(&self, ddname: &str) -> Result<String> {
        self.dd
            .lookup(ddname)
            .map(|e| e.dsname.clone())
            .ok_or_else(|| TsoError::ReadFailed {
                ddname: ddname.to_ascii_uppercase(),
                detail: "DD not allocated".to_string(),
            })
    }

    fn now(&self) -> NaiveDateTime {
        self.clock.unwrap_or_else(|| Local::now().naive_local())
    }

    fn dataset_for(&self, ddname: &str) -> Result<&Dataset> {
        let dsname = self.dsname_for(ddname)?;
        self.catalog.get(&dsname).ok_or_else(|| TsoError::ReadFailed {
            ddname: ddname.to_ascii_uppercase(),
            detail: format!("data set {dsname} not cataloged"),
        })
    }
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`SimHost`].
#[derive(Debug)]
pub struct SimHostBuilder {
    userid: String,
    modules: Vec<String>,
    probe: ProbeConfig,
    record_access: bool,
    prepare_error: Option<(i32, u32)>,
    free_failure: Option<u16>,
    ddname_reply: DdnameReply,
    authcmd: Vec<String>,
    exec_members: Vec<String>,
    datasets: Vec<(String, Vec<String>)>,
    eval_override: Option<(i32, Vec<u8>)>,
    clock: Option<NaiveDateTime>,
}

impl SimHostBuilder {
    pub fn new() -> Self {
        Self {
            userid: "IBMUSER".to_string(),
            modules: DEFAULT_MODULES.iter().map(|m| m.to_string()).collect(),
            probe: ProbeConfig {
                rc: 0,
                reason: 0,
                abend: 0,
            },
            record_access: true,
            prepare_error: None,
            free_failure: None,
            ddname_reply: DdnameReply::Requested,
            authcmd: vec!["PARMLIB".to_string()],
            exec_members: vec!["LUTSO".to_string()],
            datasets: Vec::new(),
            eval_override: None,
            clock: None,
        }
    }

    pub fn userid(mut self, userid: &str) -> Self {
        self.userid = userid.to_ascii_uppercase();
        self
    }

    /// IKJTSOEV return, reason and abend codes.
    pub fn probe_result(mut self, rc: i32, reason: u32, abend: u32) -> Self {
        self.probe = ProbeConfig { rc, reason, abend };
        self
    }

    pub fn with_module(mut self, module: &str) -> Self {
        let m = module.to_ascii_uppercase();
        if !self.modules.contains(&m) {
            self.modules.push(m);
        }
        self
    }

    pub fn without_module(mut self, module: &str) -> Self {
        let m = module.to_ascii_uppercase();
        self.modules.retain(|x| *x != m);
        self
    }

    /// Whether DDs can be opened for record input.
    pub fn record_access(mut self, enabled: bool) -> Self {
        self.record_access = enabled;
        self
    }

    /// Make IKJEFTSI fail with the given error and reason codes.
    pub fn prepare_error(mut self, error: i32, reason: u32) -> Self {
        self.prepare_error = Some((error, reason));
        self
    }

    /// Make every TSODFRE fail with the given DYNALLOC reason code.
    pub fn free_failure(mut self, darc: u16) -> Self {
        self.free_failure = Some(darc);
        self
    }

    /// How TSODALC reports the DDname it assigned.
    pub fn ddname_reply(mut self, reply: DdnameReply) -> Self {
        self.ddname_reply = reply;
        self
    }

    /// Commands that require the authorized path.
    pub fn authcmd(mut self, names: &[&str]) -> Self {
        self.authcmd = names.iter().map(|n| n.to_ascii_uppercase()).collect();
        self
    }

    /// Members of the SYSEXEC library.
    pub fn exec_members(mut self, members: &[&str]) -> Self {
        self.exec_members = members.iter().map(|m| m.to_ascii_uppercase()).collect();
        self
    }

    /// Catalog a sequential dataset holding `lines`.
    pub fn dataset(mut self, name: &str, lines: &[&str]) -> Self {
        self.datasets.push((
            name.to_ascii_uppercase(),
            lines.iter().map(|l| l.to_string()).collect(),
        ));
        self
    }

    /// Store these EVALBLK contents instead of the exec's result.
    pub fn eval_override(mut self, length: i32, data: &[u8]) -> Self {
        self.eval_override = Some((length, data.to_vec()));
        self
    }

    /// Fix the clock used by TIME.
    pub fn clock(mut self, now: NaiveDateTime) -> Self {
        self.clock = Some(now);
        self
    }

    pub fn build(self) -> SimHost {
        let mut modules = BTreeMap::new();
        for (i, name) in self.modules.iter().enumerate() {
            modules.insert(name.clone(), MODULE_BASE + (i as u32) * 0x1000);
        }

        let mut catalog = Catalog::new();
        let mut dd = DdTable::new();

        let exec_lib = format!("{}.LUAZ.EXEC", self.userid);
        let members: Vec<&str> = self.exec_members.iter().map(String::as_str).collect();
        catalog.define(Dataset::library(&exec_lib, &members));
        let tsoout = format!("{}.LUAZ.TSOOUT", self.userid);
        catalog.define(Dataset::stream(&tsoout));
        // Both names are fixed and valid, so neither allocation can collide.
        let _ = dd.allocate(Some("SYSEXEC"), &exec_lib, DatasetStatus::Shr, false);
        let _ = dd.allocate(Some("TSOOUT"), &tsoout, DatasetStatus::Mod, false);

        for (name, lines) in &self.datasets {
            let mut ds = Dataset::sequential(name, 80);
            for line in lines {
                ds.append_line(line);
            }
            catalog.define(ds);
        }

        let logon = self.clock.unwrap_or_else(|| Local::now().naive_local());
        SimHost {
            userid: self.userid,
            modules,
            probe: self.probe,
            cppl: None,
            probe_count: 0,
            calls: HashMap::new(),
            dd,
            catalog,
            record_access: self.record_access,
            prepare_error: self.prepare_error,
            free_failure: self.free_failure,
            ddname_reply: self.ddname_reply,
            authcmd: self.authcmd,
            eval_override: self.eval_override,
            tokens: HashSet::new(),
            next_token: 1,
            temp_seq: 0,
            terminal: Vec::new(),
            clock: self.clock,
            logon,
        }
    }
}

impl Default for SimHostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// HostServices
// ---------------------------------------------------------------------------

struct VecRecords(std::vec::IntoIter<Vec<u8>>);

impl RecordSource for VecRecords {
    fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.0.next())
    }
}

impl HostServices for SimHost {
    fn load(&mut self, module: &str) -> Option<EntryPoint> {
        let name = module.to_ascii_uppercase();
        self.modules.get(&name).map(|&address| EntryPoint {
            module: name,
            address,
        })
    }

    fn call(&mut self, entry: &EntryPoint, r1: u32, storage: &mut Storage) -> i32 {
        *self.calls.entry(entry.module.clone()).or_insert(0) += 1;
        let (result, parm_error_rc) = match entry.module.as_str() {
            "IKJTSOEV" => (self.svc_ikjtsoev(storage, r1), 16),
            "TSODALC" => (self.svc_tsodalc(storage, r1), 16),
            "TSODFRE" => (self.svc_tsodfre(storage, r1), 16),
            "IKJTSFI" | "IKJEFTSI" => (self.svc_ikjeftsi(storage, r1), 20),
            "IKJEFTSR" => (self.svc_ikjeftsr(storage, r1, false), 20),
            "TSOEFTR" => (self.svc_ikjeftsr(storage, r1, true), 20),
            "IRXEXEC" => (self.svc_irxexec(storage, r1), 20),
            other => (
                Err(TsoError::ServiceUnavailable {
                    module: other.to_string(),
                }),
                16,
            ),
        };
        result.unwrap_or_else(|e| {
            warn!(module = %entry.module, error = %e, "service rejected parameters");
            parm_error_rc
        })
    }

    fn open_records(&mut self, ddname: &str) -> Result<Option<Box<dyn RecordSource + '_>>> {
        let ds = self.dataset_for(ddname)?;
        match &ds.body {
            DatasetBody::Records { records, .. } if self.record_access => {
                Ok(Some(Box::new(VecRecords(records.clone().into_iter()))))
            }
            DatasetBody::Library { .. } => Err(TsoError::ReadFailed {
                ddname: ddname.to_ascii_uppercase(),
                detail: "partitioned data set requires a member".to_string(),
            }),
            _ => Ok(None),
        }
    }

    fn open_stream(&mut self, ddname: &str) -> Result<Box<dyn Read + '_>> {
        let ds = self.dataset_for(ddname)?;
        if let DatasetBody::Library { .. } = ds.body {
            return Err(TsoError::ReadFailed {
                ddname: ddname.to_ascii_uppercase(),
                detail: "partitioned data set requires a member".to_string(),
            });
        }
        Ok(Box::new(Cursor::new(ds.stream_bytes())))
    }

    fn putline(&mut self, text: &str, level: MessageLevel) -> Result<()> {
        info!(?level, "{text}");
        self.terminal.push((level, text.to_string()));
        Ok(())
    }
}
