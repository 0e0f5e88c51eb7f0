//! Host-function table and compiler configuration.
//!
//! Both are plain data handed to [`crate::compiler::generate_code`]; neither
//! is global state, mirroring the way the interpreter crate this design is
//! modeled on threads a `ConsensusParameters` value through rather than
//! reaching for statics.

use std::sync::Arc;

/// A host-provided extension function, invoked by the filter's `cop`/`copx`
/// instructions.
///
/// Receives the current accumulator value and the filter arguments, and
/// returns the new accumulator value.
pub type CopFn = Arc<dyn Fn(u32, &crate::codegen::threaded::FilterArgs<'_>) -> u32 + Send + Sync>;

/// The extension-call table an emitted filter may index into.
///
/// Analogous to `bpf_ctx_t` in the design: `cop k` looks up `copfuncs[k]`,
/// `copx` looks up `copfuncs[x]`. A filter compiled with `ctx: None` must
/// not contain `cop`/`copx` instructions. The analyzer doesn't reject this
/// up front (host-function availability isn't a structural property of the
/// bytecode), but every call site is guarded at runtime and returns 0 when
/// no context was supplied.
#[derive(Clone, Default)]
pub struct JitContext {
    copfuncs: Vec<CopFn>,
}

impl JitContext {
    /// Build a context from an ordered list of host functions; `cop k`
    /// resolves to `funcs[k]`.
    pub fn new(funcs: Vec<CopFn>) -> Self {
        Self { copfuncs: funcs }
    }

    /// Number of registered extension functions.
    pub fn nfuncs(&self) -> u32 {
        self.copfuncs.len() as u32
    }

    pub(crate) fn get(&self, index: u32) -> Option<&CopFn> {
        self.copfuncs.get(index as usize)
    }
}

impl std::fmt::Debug for JitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitContext")
            .field("nfuncs", &self.copfuncs.len())
            .finish()
    }
}

/// Build-mode knobs for [`crate::compiler::generate_code`].
///
/// `kernel` selects between the two runtime fallback strategies the
/// specification describes for out-of-bounds packet reads: the userspace
/// build always rejects (`return 0`), while the kernel build instead falls
/// back to the chained-buffer helper readers supplied through
/// [`crate::codegen::threaded::FilterArgs::chain`].
#[derive(Debug, Clone, Copy)]
pub struct JitConfig {
    /// Use the kernel-build mchain fallback path instead of rejecting
    /// outright on a primary bounds-check failure.
    pub kernel: bool,
    /// Assert, rather than silently trust, that the analyzer's scratch-cell
    /// initialization mask is empty. Intended for the kernel build, where
    /// bytecode validation is expected to already guarantee this; firing
    /// indicates a bytecode-validator bug, not a user-facing compile error.
    pub assert_scratch_initialized: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            kernel: cfg!(feature = "kernel"),
            assert_scratch_initialized: cfg!(feature = "kernel"),
        }
    }
}
