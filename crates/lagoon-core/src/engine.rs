//! The query-engine seam.
//!
//! SQL parsing and execution are external collaborators: Lagoon hands the
//! engine a statement string, bound parameters, and transactional access to
//! the block store, and receives typed rows back. Everything the engine
//! reads or writes goes through the [`TransactionManager`] it is given, so
//! engine mutations share the caller's transaction boundary.

use lagoon_error::Result;
use lagoon_txn::TransactionManager;
use lagoon_types::{QueryResult, Row, Value};

/// Executes SQL statements against transactional block storage.
///
/// Object safe: `Database` owns one engine as a boxed trait object.
pub trait QueryEngine: Send {
    /// Run one statement with positionally bound `params`.
    fn execute(
        &mut self,
        txn: &mut TransactionManager,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryResult>;

    /// Compile `sql` once for repeated execution.
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedPlan>>;

    /// Bind a query for incremental row delivery.
    ///
    /// The returned cursor owns whatever state it needs; it is not handed
    /// the transaction again at fetch time.
    fn open_cursor(
        &mut self,
        txn: &mut TransactionManager,
        sql: &str,
    ) -> Result<Box<dyn RowCursor>>;
}

/// A compiled statement, reusable across executions with fresh parameters.
pub trait PreparedPlan: Send {
    /// Execute the plan with positionally bound `params`.
    fn execute(&self, txn: &mut TransactionManager, params: &[Value]) -> Result<QueryResult>;
}

/// Forward-only, non-restartable iterator over one result set.
pub trait RowCursor: Send {
    /// Column names of the result set, in result order.
    fn columns(&self) -> &[String];

    /// Produce up to `batch_size` rows; an empty batch signals exhaustion.
    fn next_batch(&mut self, batch_size: usize) -> Result<Vec<Row>>;
}

/// Cursor over an already-materialized row set.
///
/// Engines whose result sets are small may return this instead of writing a
/// lazy cursor.
pub struct MaterializedCursor {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Row>,
}

impl MaterializedCursor {
    /// Wrap a fully-computed result set.
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into_iter(),
        }
    }
}

impl RowCursor for MaterializedCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_batch(&mut self, batch_size: usize) -> Result<Vec<Row>> {
        Ok(self.rows.by_ref().take(batch_size).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materialized_cursor_batches_in_order() {
        let rows: Vec<Row> = (0..5).map(|i| Row::new(vec![Value::Integer(i)])).collect();
        let mut cursor = MaterializedCursor::new(vec!["n".to_owned()], rows);

        let first = cursor.next_batch(2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].get(0), Some(&Value::Integer(0)));

        assert_eq!(cursor.next_batch(2).unwrap().len(), 2);
        assert_eq!(cursor.next_batch(2).unwrap().len(), 1);
        assert!(cursor.next_batch(2).unwrap().is_empty());
        // Idempotent tail.
        assert!(cursor.next_batch(2).unwrap().is_empty());
    }
}
