//! Scoped release of output bindings.
//!
//! [`with_binding`] pairs one allocation with exactly one free around the
//! caller's work. The work's result and the free's result travel
//! separately; a failed free is logged and reported next to the result,
//! never in place of it.

use tracing::warn;

use crate::alloc::{AllocationManager, BindingName};
use crate::error::{Result, TsoError};
use crate::host::HostServices;
use crate::linkage::Linkage;
use crate::probe::Capability;

/// Outcome of scoped work plus its cleanup.
#[derive(Debug)]
pub struct Released<T> {
    pub result: Result<T>,
    /// Set when the binding could not be freed.
    pub cleanup: Option<TsoError>,
}

/// Allocate an output binding, run `work` with it, then free it.
///
/// Fails outright only when the allocation fails; `work` is not run then.
pub fn with_binding<H, T, F>(
    alloc: &mut AllocationManager,
    link: &mut Linkage<H>,
    cap: Capability,
    hint: Option<&str>,
    work: F,
) -> Result<Released<T>>
where
    H: HostServices,
    F: FnOnce(&mut Linkage<H>, &BindingName) -> Result<T>,
{
    let (binding, _) = alloc.allocate(link, cap, hint)?;
    let result = work(link, &binding);
    let cleanup = release(alloc, link, cap, &binding).err();
    Ok(Released { result, cleanup })
}

/// Free `binding`, converting a failure into [`TsoError::CleanupFailed`].
pub fn release<H: HostServices>(
    alloc: &mut AllocationManager,
    link: &mut Linkage<H>,
    cap: Capability,
    binding: &BindingName,
) -> Result<()> {
    match alloc.free(link, cap, binding) {
        Ok(_) => Ok(()),
        Err(e) => {
            let err = as_cleanup_failure(binding, e);
            warn!(ddname = %binding, error = %err, "cleanup failed");
            Err(err)
        }
    }
}

/// Free every live binding; returns the failures.
pub fn release_all<H: HostServices>(
    alloc: &mut AllocationManager,
    link: &mut Linkage<H>,
    cap: Capability,
) -> Vec<TsoError> {
    let live: Vec<BindingName> = alloc.live().cloned().collect();
    live.iter()
        .filter_map(|binding| release(alloc, link, cap, binding).err())
        .collect()
}

fn as_cleanup_failure(binding: &BindingName, err: TsoError) -> TsoError {
    match err {
        TsoError::AllocationFailed {
            ddname,
            rc,
            reason,
            catalog_rc,
            ..
        } => TsoError::CleanupFailed {
            ddname,
            rc,
            reason,
            catalog_rc,
        },
        other => {
            warn!(ddname = %binding, error = %other, "free failed before reaching DAIR");
            TsoError::CleanupFailed {
                ddname: binding.to_string(),
                rc: -1,
                reason: 0,
                catalog_rc: 0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::dair::DARC_DDNAME_NOT_FOUND;
    use crate::emulator::SimHost;
    use crate::probe::EnvironmentProber;

    fn ready(host: SimHost) -> (Linkage<SimHost>, Capability) {
        let mut link = Linkage::new(host);
        let cap = EnvironmentProber::new().initialize(&mut link).unwrap();
        (link, cap)
    }

    #[test]
    fn frees_after_success_and_failure() {
        let (mut link, cap) = ready(SimHost::new());
        let mut alloc = AllocationManager::new();

        let ok = with_binding(&mut alloc, &mut link, cap, None, |_, b| Ok(b.to_string())).unwrap();
        assert_eq!(ok.result.unwrap(), "LUZ00001");
        assert!(ok.cleanup.is_none());

        let failed = with_binding(&mut alloc, &mut link, cap, None, |_, _| -> Result<()> {
            Err(TsoError::InvalidCommand {
                reason: "boom".to_string(),
            })
        })
        .unwrap();
        assert!(failed.result.is_err());
        assert!(failed.cleanup.is_none());

        assert_eq!(link.host().call_count("TSODFRE"), 2);
        assert_eq!(alloc.live().count(), 0);
    }

    #[test]
    fn cleanup_failure_is_reported_beside_the_result() {
        let (mut link, cap) = ready(SimHost::builder().free_failure(DARC_DDNAME_NOT_FOUND).build());
        let mut alloc = AllocationManager::new();
        let released = with_binding(&mut alloc, &mut link, cap, None, |_, _| Ok(42)).unwrap();
        assert_eq!(released.result.unwrap(), 42);
        assert!(matches!(
            released.cleanup,
            Some(TsoError::CleanupFailed {
                reason: DARC_DDNAME_NOT_FOUND,
                ..
            })
        ));
        // one free attempt; the binding is not retried
        assert_eq!(link.host().call_count("TSODFRE"), 1);
        assert_eq!(alloc.live().count(), 0);
    }

    #[test]
    fn allocation_failure_skips_work() {
        let (mut link, cap) = ready(SimHost::new());
        let mut alloc = AllocationManager::new();
        let mut ran = false;
        let err = with_binding(&mut alloc, &mut link, cap, Some("SYSEXEC"), |_, _| {
            ran = true;
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, TsoError::AllocationFailed { .. }));
        assert!(!ran);
    }

    #[test]
    fn release_all_frees_every_live_binding() {
        let (mut link, cap) = ready(SimHost::new());
        let mut alloc = AllocationManager::new();
        alloc.allocate(&mut link, cap, Some("A1")).unwrap();
        alloc.allocate(&mut link, cap, Some("A2")).unwrap();
        assert!(release_all(&mut alloc, &mut link, cap).is_empty());
        assert_eq!(alloc.live().count(), 0);
        assert!(link.host().dd_table().lookup("A1").is_none());
    }
}
