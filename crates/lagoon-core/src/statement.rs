//! Prepared-statement handle table.
//!
//! A statement is compiled once by the engine and reused across many
//! executions with fresh positional parameters. Using a handle after
//! `finalize` fails with `StatementNotFound`.

use lagoon_error::{LagoonError, Result};
use lagoon_txn::TransactionManager;
use lagoon_types::{QueryResult, Value};
use tracing::debug;

use crate::engine::PreparedPlan;
use crate::handles::HandleArena;

/// Handle table for compiled statements.
pub struct StatementManager {
    statements: HandleArena<Box<dyn PreparedPlan>>,
}

impl StatementManager {
    /// An empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            statements: HandleArena::new(),
        }
    }

    /// Register a compiled plan and return its statement handle.
    pub fn prepare(&mut self, plan: Box<dyn PreparedPlan>) -> u64 {
        let handle = self.statements.insert(plan);
        debug!(target: "lagoon.core", handle, "statement prepared");
        handle
    }

    /// Execute the plan behind `handle` with positionally bound `params`.
    pub fn execute(
        &self,
        handle: u64,
        txn: &mut TransactionManager,
        params: &[Value],
    ) -> Result<QueryResult> {
        let plan = self
            .statements
            .get(handle)
            .ok_or(LagoonError::StatementNotFound { handle })?;
        plan.execute(txn, params)
    }

    /// Release the plan behind `handle`.
    pub fn finalize(&mut self, handle: u64) -> Result<()> {
        self.statements
            .remove(handle)
            .ok_or(LagoonError::StatementNotFound { handle })?;
        debug!(target: "lagoon.core", handle, "statement finalized");
        Ok(())
    }

    /// Number of live statements.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.statements.len()
    }

    /// Drop every live statement, as on handle close.
    pub fn finalize_all(&mut self) {
        self.statements.clear();
    }
}

impl Default for StatementManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StatementManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementManager")
            .field("live", &self.statements.len())
            .finish()
    }
}
