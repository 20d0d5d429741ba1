//! Environment prober: establishes the CPPL through IKJTSOEV.
//!
//! The probe runs at most once per context. Its outcome, success or
//! failure, is cached for the life of the context; only an adopted CPPL
//! from an enclosing session can replace a cached failure.

use serde::Serialize;
use tracing::{info, warn};

use crate::abi::storage::SUBPOOL_ENGINE;
use crate::abi::{Last, ParmList};
use crate::error::{Result, TsoError};
use crate::host::HostServices;
use crate::linkage::Linkage;

/// IKJTSOEV return codes that leave a usable environment: established,
/// already established, and already running under TSO/E.
pub const USABLE_PROBE_RCS: [i32; 3] = [0, 8, 24];

/// Proof that privileged TSO services are usable: the CPPL address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capability {
    cppl: u32,
}

impl Capability {
    pub fn new(cppl: u32) -> Self {
        Self { cppl }
    }

    pub fn cppl(&self) -> u32 {
        self.cppl
    }

    /// Whether there is a real CPPL to forward to IKJEFTSR/IRXEXEC.
    pub fn has_cppl(&self) -> bool {
        self.cppl != 0
    }
}

/// Where the capability came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilitySource {
    /// IKJTSOEV, with its return code.
    Probed { rc: i32 },
    /// Forwarded by an enclosing command processor.
    Adopted,
}

/// Environment state for one context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvState {
    Unknown,
    Ready {
        capability: Capability,
        source: CapabilitySource,
    },
    Failed {
        rc: i32,
        reason: u32,
        abend: u32,
    },
}

#[derive(Debug)]
pub struct EnvironmentProber {
    state: EnvState,
    probes: usize,
}

impl EnvironmentProber {
    pub fn new() -> Self {
        Self {
            state: EnvState::Unknown,
            probes: 0,
        }
    }

    /// Return the capability, probing on first use only.
    pub fn initialize<H: HostServices>(&mut self, link: &mut Linkage<H>) -> Result<Capability> {
        match self.state {
            EnvState::Ready { capability, .. } => return Ok(capability),
            EnvState::Failed { rc, reason, abend } => {
                return Err(TsoError::EnvironmentUnavailable { rc, reason, abend })
            }
            EnvState::Unknown => {}
        }

        // A fault in the engine's own storage leaves the state Unknown and
        // is not counted as a probe.
        self.state = match probe(link) {
            Ok((rc, _, _, cppl)) if USABLE_PROBE_RCS.contains(&rc) => {
                info!(rc, cppl = format_args!("{cppl:#010x}"), "TSO environment ready");
                EnvState::Ready {
                    capability: Capability::new(cppl),
                    source: CapabilitySource::Probed { rc },
                }
            }
            Ok((rc, reason, abend, _)) => {
                warn!(rc, reason = format_args!("{reason:#x}"), abend = format_args!("{abend:#x}"), "IKJTSOEV failed");
                EnvState::Failed { rc, reason, abend }
            }
            Err(TsoError::ServiceUnavailable { module }) => {
                warn!(%module, "cannot probe TSO environment");
                EnvState::Failed {
                    rc: -1,
                    reason: 0,
                    abend: 0,
                }
            }
            Err(e) => return Err(e),
        };
        self.probes += 1;
        self.initialize(link)
    }

    /// Accept a CPPL from an enclosing session; no probe is ever issued
    /// afterwards.
    pub fn adopt_external_token(&mut self, cppl: u32) -> Capability {
        let capability = Capability::new(cppl);
        info!(cppl = format_args!("{cppl:#010x}"), "adopted CPPL");
        self.state = EnvState::Ready {
            capability,
            source: CapabilitySource::Adopted,
        };
        capability
    }

    pub fn state(&self) -> &EnvState {
        &self.state
    }

    /// Number of probes issued by this prober.
    pub fn probe_count(&self) -> usize {
        self.probes
    }
}

impl Default for EnvironmentProber {
    fn default() -> Self {
        Self::new()
    }
}

/// Call IKJTSOEV(parm1, rc, reason, abend, cppl).
fn probe<H: HostServices>(link: &mut Linkage<H>) -> Result<(i32, u32, u32, u32)> {
    let entry = link.fetch("IKJTSOEV")?;
    link.scoped(|link| {
        let storage = link.storage_mut();
        let parm1 = storage.getmain(SUBPOOL_ENGINE, 4)?;
        let rc = storage.getmain(SUBPOOL_ENGINE, 4)?;
        let reason = storage.getmain(SUBPOOL_ENGINE, 4)?;
        let abend = storage.getmain(SUBPOOL_ENGINE, 4)?;
        let cppl = storage.getmain(SUBPOOL_ENGINE, 4)?;

        link.call(&entry, &ParmList::new(&[parm1, rc, reason, abend], Last(cppl)))?;

        let storage = link.storage();
        Ok((
            storage.read_i32(rc)?,
            storage.read_u32(reason)?,
            storage.read_u32(abend)?,
            storage.read_u32(cppl)?,
        ))
    })
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::abi::Storage;
    use crate::emulator::SimHost;
    use crate::host::{EntryPoint, MessageLevel, RecordSource};

    #[test]
    fn probes_once() {
        let mut link = Linkage::new(SimHost::new());
        let mut prober = EnvironmentProber::new();
        let first = prober.initialize(&mut link).unwrap();
        let second = prober.initialize(&mut link).unwrap();
        assert_eq!(first, second);
        assert!(first.has_cppl());
        assert_eq!(prober.probe_count(), 1);
        assert_eq!(link.host().probe_count(), 1);
        assert!(matches!(
            prober.state(),
            EnvState::Ready {
                source: CapabilitySource::Probed { rc: 0 },
                ..
            }
        ));
    }

    #[test]
    fn already_initialized_codes_are_usable() {
        for rc in [8, 24] {
            let host = SimHost::builder().probe_result(rc, 0, 0).build();
            let mut link = Linkage::new(host);
            assert!(EnvironmentProber::new().initialize(&mut link).is_ok(), "rc {rc}");
        }
    }

    #[test]
    fn failure_is_cached() {
        let host = SimHost::builder().probe_result(12, 0x40, 0).build();
        let mut link = Linkage::new(host);
        let mut prober = EnvironmentProber::new();
        for _ in 0..3 {
            let err = prober.initialize(&mut link).unwrap_err();
            assert_eq!(
                err,
                TsoError::EnvironmentUnavailable {
                    rc: 12,
                    reason: 0x40,
                    abend: 0
                }
            );
        }
        assert_eq!(link.host().probe_count(), 1);
    }

    #[test]
    fn missing_ikjtsoev_is_permanent() {
        let host = SimHost::builder().without_module("IKJTSOEV").build();
        let mut link = Linkage::new(host);
        let mut prober = EnvironmentProber::new();
        assert!(matches!(
            prober.initialize(&mut link),
            Err(TsoError::EnvironmentUnavailable { rc: -1, .. })
        ));
        assert!(prober.initialize(&mut link).is_err());
        assert_eq!(prober.probe_count(), 1);
    }

    /// Releases the rc word before IKJTSOEV returns, once.
    struct LosesRcWord {
        inner: SimHost,
        faults: usize,
    }

    impl HostServices for LosesRcWord {
        fn load(&mut self, module: &str) -> Option<EntryPoint> {
            self.inner.load(module)
        }

        fn call(&mut self, entry: &EntryPoint, r1: u32, storage: &mut Storage) -> i32 {
            let r15 = self.inner.call(entry, r1, storage);
            if self.faults > 0 {
                self.faults -= 1;
                let rc_word = storage.read_u32(r1 + 4).unwrap();
                storage.freemain(rc_word).unwrap();
            }
            r15
        }

        fn open_records(&mut self, ddname: &str) -> Result<Option<Box<dyn RecordSource + '_>>> {
            self.inner.open_records(ddname)
        }

        fn open_stream(&mut self, ddname: &str) -> Result<Box<dyn Read + '_>> {
            self.inner.open_stream(ddname)
        }

        fn putline(&mut self, text: &str, level: MessageLevel) -> Result<()> {
            self.inner.putline(text, level)
        }
    }

    #[test]
    fn storage_fault_is_neither_cached_nor_counted() {
        let mut link = Linkage::new(LosesRcWord {
            inner: SimHost::new(),
            faults: 1,
        });
        let mut prober = EnvironmentProber::new();
        let err = prober.initialize(&mut link).unwrap_err();
        assert!(matches!(err, TsoError::AddressFault { .. }));
        assert_eq!(prober.state(), &EnvState::Unknown);
        assert_eq!(prober.probe_count(), 0);

        assert!(prober.initialize(&mut link).unwrap().has_cppl());
        assert_eq!(prober.probe_count(), 1);
        assert_eq!(link.host().inner.probe_count(), 2);
    }

    #[test]
    fn adoption_overrides_failure_and_skips_probe() {
        let host = SimHost::builder().probe_result(12, 0, 0).build();
        let mut link = Linkage::new(host);
        let mut prober = EnvironmentProber::new();
        assert!(prober.initialize(&mut link).is_err());
        prober.adopt_external_token(0x0001_2340);
        let cap = prober.initialize(&mut link).unwrap();
        assert_eq!(cap.cppl(), 0x0001_2340);
        assert_eq!(link.host().probe_count(), 1);
    }
}
