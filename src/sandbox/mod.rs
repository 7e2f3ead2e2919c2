//! Isolated execution of model-written code
//!
//! This module provides the executor behind the `execute_code` tool and the
//! hardening applied to each sandboxed child:
//! - fresh process per call, cleared environment, private scratch directory
//! - capability dropping (`capabilities`)
//! - seccomp denial of IP sockets (`seccomp`)
//! - hard wall-clock deadline with process-group kill (`executor`)
//! - captured output capped at `MAX_OUTPUT_BYTES`
//!
//! # Usage Order (inside the forked child, before exec)
//! 1. `setpgid(0, 0)` so the whole tree can be killed on timeout
//! 2. Drop capabilities planned in the parent (`CapabilityDropper::apply_in_child`)
//! 3. Install the seccomp filter (also sets `no_new_privs`)
//! 4. exec(interpreter)

pub mod capabilities;
pub mod executor;
pub mod seccomp;

pub use capabilities::CapabilityDropper;
pub use executor::{
    CapturedOutput, ExecutionError, SandboxExecutor, SandboxRuntime, DEFAULT_TIMEOUT,
    MAX_OUTPUT_BYTES, NO_OUTPUT_PLACEHOLDER, OUTPUT_TRUNCATED_NOTICE,
};
pub use seccomp::NetworkSeccomp;
