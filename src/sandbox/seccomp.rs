//! Seccomp BPF filter that cuts sandboxed code off from the network
//!
//! # How the Filter Works
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  sandboxed child ──syscall──► BPF program ──► decision         │
//! │                                                                │
//! │  socket(AF_INET,  ...)  ──► match  ──► EACCES                 │
//! │  socket(AF_INET6, ...)  ──► match  ──► EACCES                 │
//! │  socket(AF_UNIX,  ...)  ──► no match ──► ALLOW                │
//! │  read / write / mmap    ──► no match ──► ALLOW                │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Unlike an allowlist this denylist keeps interpreters such as `node`
//! working unchanged; it only removes the ability to open IP sockets, which
//! is what would let untrusted code reach the network with borrowed
//! credentials.

use std::collections::BTreeMap;
use std::convert::TryInto;
use std::io;

use seccompiler::{
    BpfProgram,       // Vec<sock_filter> - the compiled bytecode
    SeccompAction,    // What to do: Allow, Errno, ...
    SeccompCmpArgLen, // Width of the compared argument
    SeccompCmpOp,     // Comparison operator
    SeccompCondition, // One argument check
    SeccompFilter,    // The filter with rules
    SeccompRule,      // A set of conditions for one syscall
    TargetArch,       // CPU architecture (x86_64, aarch64)
};

fn to_io<E: std::fmt::Display>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

/// Builder for a filter denying `socket(2)` for selected address families
#[derive(Debug, Clone, Default)]
pub struct NetworkSeccomp {
    /// Address families (`libc::AF_*`) that may not be opened
    denied_families: Vec<i32>,
}

impl NetworkSeccomp {
    /// An empty filter that denies nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Deny IPv4 and IPv6 sockets
    pub fn with_inet_denied() -> Self {
        let mut filter = Self::new();
        filter.deny_family(libc::AF_INET).deny_family(libc::AF_INET6);
        filter
    }

    pub fn deny_family(&mut self, family: i32) -> &mut Self {
        if !self.denied_families.contains(&family) {
            self.denied_families.push(family);
        }
        self
    }

    pub fn denied_count(&self) -> usize {
        self.denied_families.len()
    }

    /// Compile the filter into BPF bytecode for the current architecture
    ///
    /// Rules attached to one syscall are OR-ed, so each denied family gets
    /// its own single-condition rule on argument 0 (`domain`).
    pub fn build(&self) -> Result<BpfProgram, io::Error> {
        let mut socket_rules = Vec::with_capacity(self.denied_families.len());
        for &family in &self.denied_families {
            let condition = SeccompCondition::new(
                0,
                SeccompCmpArgLen::Dword,
                SeccompCmpOp::Eq,
                family as u64,
            )
            .map_err(to_io)?;
            socket_rules.push(SeccompRule::new(vec![condition]).map_err(to_io)?);
        }

        let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();
        if !socket_rules.is_empty() {
            rules.insert(libc::SYS_socket, socket_rules);
        }

        let arch: TargetArch = std::env::consts::ARCH.try_into().map_err(to_io)?;

        let filter = SeccompFilter::new(
            rules,
            SeccompAction::Allow,                        // syscalls that match no rule
            SeccompAction::Errno(libc::EACCES as u32),   // denied socket families
            arch,
        )
        .map_err(to_io)?;

        filter.try_into().map_err(to_io)
    }
}

/// Install a compiled filter on the calling thread
///
/// Meant for the forked child right before `exec`: it neither allocates nor
/// formats on failure. `apply_filter` also sets `PR_SET_NO_NEW_PRIVS`, which
/// is inherited across `exec`.
pub(crate) fn apply_in_child(program: &BpfProgram) -> io::Result<()> {
    seccompiler::apply_filter(program).map_err(|_| io::Error::from_raw_os_error(libc::EPERM))
}
