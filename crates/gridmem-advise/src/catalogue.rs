//! Catalogue of instrumentation output, keyed by kernel.
//!
//! The kernel-side pass dumps flat rows describing loops, accesses,
//! branch conditions and recurrence-to-loop associations. Rows
//! deserialize with serde; ingest parses their token streams into
//! trees once, so the evaluators never touch raw tokens.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use gridmem_expr::{build_postfix, build_prefix, BuildConfig, ExprResult, ExprTree};

/// Serialized loop description, one row per kernel loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopRow {
    /// Kernel symbol name.
    pub kernel: String,
    /// Loop id; id 0 means "not in a loop" and never appears as a row.
    pub loop_id: u32,
    /// Id of the enclosing loop, 0 at the top level.
    #[serde(default)]
    pub parent_loop_id: u32,
    /// Postfix stream for the initial induction value.
    #[serde(default)]
    pub init_tokens: Vec<String>,
    /// Postfix stream for the bound the induction runs to.
    #[serde(default)]
    pub final_tokens: Vec<String>,
    /// Postfix stream for the per-iteration step.
    #[serde(default)]
    pub step_tokens: Vec<String>,
    /// Trip count, when the pass could already prove it.
    #[serde(default)]
    pub known_iters: Option<u64>,
}

/// Serialized access description, one row per static memory access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRow {
    /// Kernel symbol name.
    pub kernel: String,
    /// Dense id of the access within its kernel.
    pub access_id: u32,
    /// Formal argument index of the allocation being accessed.
    pub alloc_arg: u32,
    /// Innermost enclosing loop, 0 when outside all loops.
    #[serde(default)]
    pub loop_id: u32,
    /// Guarding branch condition, 0 when unconditional.
    #[serde(default)]
    pub cond_id: u32,
    /// Postfix stream of the index expression.
    #[serde(default)]
    pub postfix_tokens: Vec<String>,
    /// Parenthesized prefix stream preserving operand arity.
    #[serde(default)]
    pub prefix_tokens: Vec<String>,
}

/// A loop with its bound expressions parsed.
#[derive(Debug, Clone)]
pub struct LoopRecord {
    /// Loop id.
    pub loop_id: u32,
    /// Enclosing loop, 0 at the top level.
    pub parent_loop_id: u32,
    /// Initial induction value.
    pub init: Option<ExprTree>,
    /// Final bound.
    pub fin: Option<ExprTree>,
    /// Per-iteration step.
    pub step: Option<ExprTree>,
    /// Trip count proven by the pass, bypassing bound evaluation.
    pub known_iters: Option<u64>,
}

/// An access with both expression forms parsed.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    /// Dense id within the kernel.
    pub access_id: u32,
    /// Allocation argument index.
    pub alloc_arg: u32,
    /// Innermost enclosing loop, 0 when outside all loops.
    pub loop_id: u32,
    /// Guarding condition, 0 when unconditional.
    pub cond_id: u32,
    /// Binary index expression; carries the pointer-chase or
    /// incomplete marker when the stream was flagged.
    pub expr: Option<ExprTree>,
    /// Arity-preserving form used for recurrence drift and
    /// indirection checks.
    pub nary: Option<ExprTree>,
    /// A recorded token stream failed to parse; the access can only
    /// be flagged, never estimated.
    pub malformed: bool,
}

/// Everything recorded for one kernel.
#[derive(Debug, Default)]
pub struct KernelCatalogue {
    loops: HashMap<u32, LoopRecord>,
    accesses: BTreeMap<u32, AccessRecord>,
    conds: HashMap<u32, ExprTree>,
    phi_loops: HashMap<u32, u32>,
}

impl KernelCatalogue {
    /// Loop record by id.
    pub fn loop_record(&self, loop_id: u32) -> Option<&LoopRecord> {
        self.loops.get(&loop_id)
    }

    /// Access record by id.
    pub fn access(&self, access_id: u32) -> Option<&AccessRecord> {
        self.accesses.get(&access_id)
    }

    /// All accesses in id order.
    pub fn accesses(&self) -> impl Iterator<Item = &AccessRecord> {
        self.accesses.values()
    }

    /// All loop ids.
    pub fn loop_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.loops.keys().copied()
    }

    /// Condition expression by id.
    pub fn condition(&self, cond_id: u32) -> Option<&ExprTree> {
        self.conds.get(&cond_id)
    }

    /// Loop a recurrence index belongs to.
    pub fn loop_of_phi(&self, phi_index: u32) -> Option<u32> {
        self.phi_loops.get(&phi_index).copied()
    }
}

/// Catalogue of all instrumented kernels.
///
/// A plain value: build one per analysis run, fill it from rows, then
/// hand shared references to the estimator.
#[derive(Debug, Default)]
pub struct Catalogue {
    kernels: HashMap<String, KernelCatalogue>,
    config: BuildConfig,
}

impl Catalogue {
    /// Empty catalogue with default build limits.
    pub fn new() -> Catalogue {
        Catalogue::default()
    }

    /// Empty catalogue with explicit build limits.
    pub fn with_config(config: BuildConfig) -> Catalogue {
        Catalogue { kernels: HashMap::new(), config }
    }

    fn kernel_mut(&mut self, name: &str) -> &mut KernelCatalogue {
        self.kernels.entry(name.to_owned()).or_default()
    }

    /// Per-kernel records, if the kernel was instrumented.
    pub fn kernel(&self, name: &str) -> Option<&KernelCatalogue> {
        self.kernels.get(name)
    }

    /// Ingests one loop row, parsing its three bound streams.
    pub fn add_loop(&mut self, row: &LoopRow) -> ExprResult<()> {
        let record = LoopRecord {
            loop_id: row.loop_id,
            parent_loop_id: row.parent_loop_id,
            init: build_postfix(&row.init_tokens, &self.config)?,
            fin: build_postfix(&row.final_tokens, &self.config)?,
            step: build_postfix(&row.step_tokens, &self.config)?,
            known_iters: row.known_iters,
        };
        debug!(kernel = %row.kernel, loop_id = row.loop_id, "catalogued loop");
        self.kernel_mut(&row.kernel).loops.insert(row.loop_id, record);
        Ok(())
    }

    /// Ingests one access row, parsing both expression forms.
    ///
    /// A token stream that fails to parse is logged and stored as
    /// absent; the row stays in the catalogue so the estimator can
    /// flag the access instead of losing the site.
    pub fn add_access(&mut self, row: &AccessRow) {
        let mut malformed = false;
        let expr = match build_postfix(&row.postfix_tokens, &self.config) {
            Ok(tree) => tree,
            Err(e) => {
                warn!(
                    kernel = %row.kernel,
                    access_id = row.access_id,
                    error = %e,
                    "unparseable postfix stream"
                );
                malformed = true;
                None
            }
        };
        let nary = match build_prefix(&row.prefix_tokens, &self.config) {
            Ok(tree) => tree,
            Err(e) => {
                warn!(
                    kernel = %row.kernel,
                    access_id = row.access_id,
                    error = %e,
                    "unparseable prefix stream"
                );
                malformed = true;
                None
            }
        };
        let record = AccessRecord {
            access_id: row.access_id,
            alloc_arg: row.alloc_arg,
            loop_id: row.loop_id,
            cond_id: row.cond_id,
            expr,
            nary,
            malformed,
        };
        debug!(kernel = %row.kernel, access_id = row.access_id, "catalogued access");
        self.kernel_mut(&row.kernel).accesses.insert(row.access_id, record);
    }

    /// Ingests one branch condition as a postfix stream.
    pub fn add_condition<S: AsRef<str>>(
        &mut self,
        kernel: &str,
        cond_id: u32,
        tokens: &[S],
    ) -> ExprResult<()> {
        if let Some(tree) = build_postfix(tokens, &self.config)? {
            self.kernel_mut(kernel).conds.insert(cond_id, tree);
        }
        Ok(())
    }

    /// Associates a recurrence index with the loop that drives it.
    pub fn add_phi_loop(&mut self, kernel: &str, phi_index: u32, loop_id: u32) {
        self.kernel_mut(kernel).phi_loops.insert(phi_index, loop_id);
    }
}
