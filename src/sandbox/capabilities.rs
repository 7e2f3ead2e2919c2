//! Capability dropping for sandboxed children
//!
//! When nexus itself runs as root (common inside containers) a spawned
//! interpreter would inherit every root power. The child therefore sheds its
//! capabilities between `fork` and `exec`:
//!
//! ```text
//! ┌───────────────────┬─────────────────────────────────────────────┐
//! │  Bounding (B)     │ dropped first, while CAP_SETPCAP is still   │
//! │                   │ effective; stops root regaining caps on exec│
//! ├───────────────────┼─────────────────────────────────────────────┤
//! │  Ambient (A)      │ cleared                                     │
//! ├───────────────────┼─────────────────────────────────────────────┤
//! │  Effective (E)    │                                             │
//! │  Permitted (P)    │ cleared together with one capset(2)         │
//! │  Inheritable (I)  │                                             │
//! └───────────────────┴─────────────────────────────────────────────┘
//! ```
//!
//! The `caps` crate reports failures with formatted strings, so it is only
//! consulted in the parent. The forked child issues raw `prctl`/`capset`
//! calls on data resolved before the fork and ignores their results.

use caps::{CapSet, Capability};
use nix::unistd::geteuid;

/// `_LINUX_CAPABILITY_VERSION_3`: two 32-bit words per set
const CAPABILITY_VERSION_3: u32 = 0x2008_0522;

// Read by the kernel only
#[allow(dead_code)]
#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: libc::c_int,
}

#[allow(dead_code)]
#[repr(C)]
#[derive(Clone, Copy, Default)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

/// Capabilities to remove from a sandboxed child
#[derive(Debug, Clone, Default)]
pub struct CapabilityDropper {
    /// Bounding-set indices, resolved before `fork` so the child never allocates
    bounding: Vec<u8>,
    /// Whether the parent holds anything worth shedding
    active: bool,
}

impl CapabilityDropper {
    /// Inspect the calling process and plan the drop for its children
    ///
    /// An unprivileged parent yields an inert dropper: its children start
    /// with empty E/P/A sets and cannot touch the bounding set anyway.
    pub fn for_current_process() -> Self {
        let permitted = caps::read(None, CapSet::Permitted).unwrap_or_default();
        let active = geteuid().is_root() || !permitted.is_empty();
        if !active {
            return Self::default();
        }

        let mut bounding: Vec<u8> = caps::read(None, CapSet::Bounding)
            .unwrap_or_default()
            .into_iter()
            .map(|cap| cap.index())
            .collect();
        bounding.sort_unstable();
        // CAP_SETPCAP guards PR_CAPBSET_DROP itself, so it goes last
        let setpcap = Capability::CAP_SETPCAP.index();
        if let Some(pos) = bounding.iter().position(|&idx| idx == setpcap) {
            bounding.remove(pos);
            bounding.push(setpcap);
        }

        Self { bounding, active }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn drop_count(&self) -> usize {
        self.bounding.len()
    }

    /// Shed capabilities in the forked child
    ///
    /// Raw syscalls only; failures are ignored since there is nothing the
    /// child could report without allocating.
    pub(crate) fn apply_in_child(&self) {
        if !self.active {
            return;
        }

        for &idx in &self.bounding {
            // SAFETY: prctl with integer arguments only
            unsafe {
                libc::prctl(
                    libc::PR_CAPBSET_DROP,
                    libc::c_ulong::from(idx),
                    0 as libc::c_ulong,
                    0 as libc::c_ulong,
                    0 as libc::c_ulong,
                );
            }
        }

        // SAFETY: prctl with integer arguments only
        unsafe {
            libc::prctl(
                libc::PR_CAP_AMBIENT,
                libc::PR_CAP_AMBIENT_CLEAR_ALL as libc::c_ulong,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
            );
        }

        let mut header = CapUserHeader {
            version: CAPABILITY_VERSION_3,
            pid: 0,
        };
        let data = [CapUserData::default(); 2];
        // SAFETY: header and data live on this stack frame for the call and
        // match the kernel's v3 layout
        unsafe {
            libc::syscall(
                libc::SYS_capset,
                &mut header as *mut CapUserHeader,
                data.as_ptr(),
            );
        }
    }
}
