//! A deliberately small table engine for exercising the storage contract.
//!
//! Real deployments plug a full SQL engine into the [`QueryEngine`] seam;
//! this one understands just enough of the dialect to drive transactions,
//! cursors, prepared statements, and snapshots through realistic shapes:
//!
//! ```text
//! CREATE TABLE t (a, b, ...)
//! INSERT INTO t VALUES (1, 'text', 2.5, NULL, ?)
//! SELECT * FROM t
//! SELECT COUNT(*) FROM t
//! DELETE FROM t
//! DROP TABLE t
//! ```
//!
//! Storage layout: block 0 holds the table catalog, each table owns one
//! block holding its rows, both JSON-encoded. Everything goes through the
//! caller's [`TransactionManager`], so engine writes share the caller's
//! transaction boundary.

mod parse;

use std::collections::BTreeMap;

use lagoon_core::{MaterializedCursor, PreparedPlan, QueryEngine, RowCursor};
use lagoon_error::{LagoonError, Result};
use lagoon_txn::TransactionManager;
use lagoon_types::{BlockId, QueryResult, Row, Value};
use tracing::debug;

use parse::{Statement, Term};

const CATALOG_BLOCK: BlockId = BlockId(0);

#[derive(Clone, serde::Serialize, serde::Deserialize)]
struct TableInfo {
    block: u64,
    columns: Vec<String>,
}

type Catalog = BTreeMap<String, TableInfo>;

/// The scripted table engine.
#[derive(Debug, Default)]
pub struct TableEngine;

impl TableEngine {
    /// Create an engine. All state lives in the block store.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Boxed form, ready to hand to `Database::open`.
    #[must_use]
    pub fn boxed() -> Box<dyn QueryEngine> {
        Box::new(Self)
    }
}

impl QueryEngine for TableEngine {
    fn execute(
        &mut self,
        txn: &mut TransactionManager,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryResult> {
        let statement = parse::parse(sql)?;
        run(txn, &statement, params)
    }

    fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedPlan>> {
        let statement = parse::parse(sql)?;
        Ok(Box::new(TablePlan { statement }))
    }

    fn open_cursor(
        &mut self,
        txn: &mut TransactionManager,
        sql: &str,
    ) -> Result<Box<dyn RowCursor>> {
        let statement = parse::parse(sql)?;
        let result = run(txn, &statement, &[])?;
        Ok(Box::new(MaterializedCursor::new(result.columns, result.rows)))
    }
}

/// A parsed statement held for repeated execution.
struct TablePlan {
    statement: Statement,
}

impl PreparedPlan for TablePlan {
    fn execute(&self, txn: &mut TransactionManager, params: &[Value]) -> Result<QueryResult> {
        run(txn, &self.statement, params)
    }
}

fn run(txn: &mut TransactionManager, statement: &Statement, params: &[Value]) -> Result<QueryResult> {
    match statement {
        Statement::CreateTable { name, columns } => {
            let mut catalog = load_catalog(txn)?;
            if catalog.contains_key(name) {
                return Err(LagoonError::internal(format!("table already exists: {name}")));
            }
            let block = catalog
                .values()
                .map(|t| t.block)
                .max()
                .unwrap_or(CATALOG_BLOCK.get())
                + 1;
            save_rows(txn, block, &[])?;
            catalog.insert(
                name.clone(),
                TableInfo {
                    block,
                    columns: columns.clone(),
                },
            );
            save_catalog(txn, &catalog)?;
            debug!(target: "lagoon.harness", table = %name, block, "table created");
            Ok(QueryResult::empty())
        }
        Statement::Insert { name, values } => {
            let catalog = load_catalog(txn)?;
            let info = lookup(&catalog, name)?;
            if values.len() != info.columns.len() {
                return Err(LagoonError::internal(format!(
                    "table {name} has {} columns, {} values given",
                    info.columns.len(),
                    values.len()
                )));
            }
            let row = bind_row(values, params)?;
            let mut rows = load_rows(txn, info.block)?;
            rows.push(row);
            save_rows(txn, info.block, &rows)?;
            Ok(QueryResult::changes(1))
        }
        Statement::SelectAll { name } => {
            let catalog = load_catalog(txn)?;
            let info = lookup(&catalog, name)?;
            let rows = load_rows(txn, info.block)?;
            Ok(QueryResult {
                columns: info.columns.clone(),
                rows: rows.into_iter().map(Row::new).collect(),
                rows_affected: 0,
            })
        }
        Statement::SelectCount { name } => {
            let catalog = load_catalog(txn)?;
            let info = lookup(&catalog, name)?;
            let count = load_rows(txn, info.block)?.len() as i64;
            Ok(QueryResult {
                columns: vec!["COUNT(*)".to_owned()],
                rows: vec![Row::new(vec![Value::Integer(count)])],
                rows_affected: 0,
            })
        }
        Statement::DeleteAll { name } => {
            let catalog = load_catalog(txn)?;
            let info = lookup(&catalog, name)?;
            let removed = load_rows(txn, info.block)?.len() as u64;
            save_rows(txn, info.block, &[])?;
            Ok(QueryResult::changes(removed))
        }
        Statement::DropTable { name } => {
            let mut catalog = load_catalog(txn)?;
            let info = catalog
                .remove(name)
                .ok_or_else(|| LagoonError::internal(format!("no such table: {name}")))?;
            txn.delete_block(BlockId(info.block))?;
            save_catalog(txn, &catalog)?;
            Ok(QueryResult::empty())
        }
    }
}

fn lookup<'a>(catalog: &'a Catalog, name: &str) -> Result<&'a TableInfo> {
    catalog
        .get(name)
        .ok_or_else(|| LagoonError::internal(format!("no such table: {name}")))
}

fn bind_row(terms: &[Term], params: &[Value]) -> Result<Vec<Value>> {
    let mut row = Vec::with_capacity(terms.len());
    for term in terms {
        row.push(match term {
            Term::Literal(value) => value.clone(),
            Term::Param(index) => params
                .get(*index)
                .cloned()
                .ok_or_else(|| {
                    LagoonError::internal(format!("no value bound for parameter {}", index + 1))
                })?,
        });
    }
    Ok(row)
}

fn load_catalog(txn: &mut TransactionManager) -> Result<Catalog> {
    match txn.read_block(CATALOG_BLOCK) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| LagoonError::metadata_corrupt(format!("table catalog: {e}"))),
        Err(LagoonError::BlockNotFound { .. }) => Ok(Catalog::new()),
        Err(e) => Err(e),
    }
}

fn save_catalog(txn: &mut TransactionManager, catalog: &Catalog) -> Result<()> {
    let bytes = serde_json::to_vec(catalog)
        .map_err(|e| LagoonError::internal(format!("catalog encode: {e}")))?;
    txn.write_block(CATALOG_BLOCK, bytes)
}

fn load_rows(txn: &mut TransactionManager, block: u64) -> Result<Vec<Vec<Value>>> {
    match txn.read_block(BlockId(block)) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| LagoonError::metadata_corrupt(format!("table rows: {e}"))),
        Err(LagoonError::BlockNotFound { .. }) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

fn save_rows(txn: &mut TransactionManager, block: u64, rows: &[Vec<Value>]) -> Result<()> {
    let bytes =
        serde_json::to_vec(rows).map_err(|e| LagoonError::internal(format!("row encode: {e}")))?;
    txn.write_block(BlockId(block), bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lagoon_store::{BlockStore, SharedStore};
    use std::sync::Arc;

    fn txn() -> TransactionManager {
        let store = BlockStore::open(Arc::new(SharedStore::new("harness")), None).unwrap();
        TransactionManager::new(Arc::new(store))
    }

    fn exec(engine: &mut TableEngine, txn: &mut TransactionManager, sql: &str) -> QueryResult {
        engine.execute(txn, sql, &[]).unwrap()
    }

    #[test]
    fn create_insert_select() {
        let mut engine = TableEngine::new();
        let mut txn = txn();

        exec(&mut engine, &mut txn, "CREATE TABLE users (id, name)");
        exec(&mut engine, &mut txn, "INSERT INTO users VALUES (1, 'ada')");
        exec(&mut engine, &mut txn, "INSERT INTO users VALUES (2, 'brin')");

        let result = exec(&mut engine, &mut txn, "SELECT * FROM users");
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0].get(0), Some(&Value::Integer(1)));
        assert_eq!(result.rows[1].get(1).unwrap().as_text(), Some("brin"));

        let count = exec(&mut engine, &mut txn, "SELECT COUNT(*) FROM users");
        assert_eq!(count.rows[0].get(0), Some(&Value::Integer(2)));
    }

    #[test]
    fn literals_cover_the_value_union() {
        let mut engine = TableEngine::new();
        let mut txn = txn();
        exec(&mut engine, &mut txn, "CREATE TABLE t (a, b, c, d)");
        exec(
            &mut engine,
            &mut txn,
            "INSERT INTO t VALUES (-3, 2.5, 'it''s, quoted', NULL)",
        );

        let rows = exec(&mut engine, &mut txn, "SELECT * FROM t").rows;
        assert_eq!(rows[0].get(0), Some(&Value::Integer(-3)));
        assert_eq!(rows[0].get(1), Some(&Value::Real(2.5)));
        assert_eq!(rows[0].get(2).unwrap().as_text(), Some("it's, quoted"));
        assert!(rows[0].get(3).unwrap().is_null());
    }

    #[test]
    fn positional_parameters_bind_in_order() {
        let mut engine = TableEngine::new();
        let mut txn = txn();
        exec(&mut engine, &mut txn, "CREATE TABLE t (a, b)");

        engine
            .execute(
                &mut txn,
                "INSERT INTO t VALUES (?, ?)",
                &[Value::Integer(7), Value::from("bound")],
            )
            .unwrap();

        let rows = exec(&mut engine, &mut txn, "SELECT * FROM t").rows;
        assert_eq!(rows[0].get(0), Some(&Value::Integer(7)));
        assert_eq!(rows[0].get(1).unwrap().as_text(), Some("bound"));

        // Missing binding is an error, not a silent NULL.
        assert!(engine
            .execute(&mut txn, "INSERT INTO t VALUES (?, ?)", &[Value::Integer(1)])
            .is_err());
    }

    #[test]
    fn delete_and_drop() {
        let mut engine = TableEngine::new();
        let mut txn = txn();
        exec(&mut engine, &mut txn, "CREATE TABLE t (a)");
        exec(&mut engine, &mut txn, "INSERT INTO t VALUES (1)");
        exec(&mut engine, &mut txn, "INSERT INTO t VALUES (2)");

        let deleted = exec(&mut engine, &mut txn, "DELETE FROM t");
        assert_eq!(deleted.rows_affected, 2);
        let count = exec(&mut engine, &mut txn, "SELECT COUNT(*) FROM t");
        assert_eq!(count.rows[0].get(0), Some(&Value::Integer(0)));

        exec(&mut engine, &mut txn, "DROP TABLE t");
        assert!(engine.execute(&mut txn, "SELECT * FROM t", &[]).is_err());
    }

    #[test]
    fn unknown_table_and_arity_errors() {
        let mut engine = TableEngine::new();
        let mut txn = txn();
        assert!(engine.execute(&mut txn, "SELECT * FROM ghost", &[]).is_err());

        exec(&mut engine, &mut txn, "CREATE TABLE t (a, b)");
        assert!(engine
            .execute(&mut txn, "INSERT INTO t VALUES (1)", &[])
            .is_err());
        assert!(engine
            .execute(&mut txn, "CREATE TABLE t (x)", &[])
            .is_err());
    }

    #[test]
    fn prepared_plan_reuses_the_parse() {
        let mut engine = TableEngine::new();
        let mut txn = txn();
        exec(&mut engine, &mut txn, "CREATE TABLE t (n)");

        let plan = engine.prepare("INSERT INTO t VALUES (?)").unwrap();
        for i in 0..3 {
            plan.execute(&mut txn, &[Value::Integer(i)]).unwrap();
        }
        let count = exec(&mut engine, &mut txn, "SELECT COUNT(*) FROM t");
        assert_eq!(count.rows[0].get(0), Some(&Value::Integer(3)));
    }

    #[test]
    fn cursor_streams_all_rows() {
        let mut engine = TableEngine::new();
        let mut txn = txn();
        exec(&mut engine, &mut txn, "CREATE TABLE t (n)");
        for i in 0..7 {
            engine
                .execute(&mut txn, "INSERT INTO t VALUES (?)", &[Value::Integer(i)])
                .unwrap();
        }

        let mut cursor = engine.open_cursor(&mut txn, "SELECT * FROM t").unwrap();
        let mut streamed = 0;
        loop {
            let batch = cursor.next_batch(3).unwrap();
            if batch.is_empty() {
                break;
            }
            streamed += batch.len();
        }
        assert_eq!(streamed, 7);
    }
}
