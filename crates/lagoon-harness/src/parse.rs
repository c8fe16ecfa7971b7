//! Statement parsing for the scripted dialect.
//!
//! Keywords are case-insensitive; table and column names are taken
//! verbatim. String literals use single quotes with `''` as the escape.

use lagoon_error::{LagoonError, Result};
use lagoon_types::Value;

/// One value position in an INSERT: a literal or a positional parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Literal(Value),
    /// Zero-based index into the bound parameter slice.
    Param(usize),
}

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable { name: String, columns: Vec<String> },
    Insert { name: String, values: Vec<Term> },
    SelectAll { name: String },
    SelectCount { name: String },
    DeleteAll { name: String },
    DropTable { name: String },
}

pub fn parse(sql: &str) -> Result<Statement> {
    let sql = sql.trim().trim_end_matches(';').trim();
    let upper = sql.to_ascii_uppercase();

    if upper.starts_with("CREATE TABLE") {
        parse_create(sql)
    } else if upper.starts_with("INSERT INTO") {
        parse_insert(sql, &upper)
    } else if upper.starts_with("SELECT COUNT(*) FROM") {
        Ok(Statement::SelectCount {
            name: name_after(sql, "SELECT COUNT(*) FROM".len())?,
        })
    } else if upper.starts_with("SELECT * FROM") {
        Ok(Statement::SelectAll {
            name: name_after(sql, "SELECT * FROM".len())?,
        })
    } else if upper.starts_with("DELETE FROM") {
        Ok(Statement::DeleteAll {
            name: name_after(sql, "DELETE FROM".len())?,
        })
    } else if upper.starts_with("DROP TABLE") {
        Ok(Statement::DropTable {
            name: name_after(sql, "DROP TABLE".len())?,
        })
    } else {
        Err(unparsable(sql))
    }
}

fn unparsable(sql: &str) -> LagoonError {
    LagoonError::internal(format!("statement not in the scripted dialect: {sql}"))
}

fn name_after(sql: &str, prefix_len: usize) -> Result<String> {
    let name = sql[prefix_len..].trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(unparsable(sql));
    }
    Ok(name.to_owned())
}

fn parse_create(sql: &str) -> Result<Statement> {
    let open = sql.find('(').ok_or_else(|| unparsable(sql))?;
    let close = sql.rfind(')').ok_or_else(|| unparsable(sql))?;
    if close < open {
        return Err(unparsable(sql));
    }
    let name = sql["CREATE TABLE".len()..open].trim();
    if name.is_empty() {
        return Err(unparsable(sql));
    }
    // Each comma-separated definition contributes its first token as the
    // column name; any type annotation after it is ignored.
    let columns: Vec<String> = sql[open + 1..close]
        .split(',')
        .filter_map(|def| def.split_whitespace().next())
        .map(str::to_owned)
        .collect();
    if columns.is_empty() {
        return Err(unparsable(sql));
    }
    Ok(Statement::CreateTable {
        name: name.to_owned(),
        columns,
    })
}

fn parse_insert(sql: &str, upper: &str) -> Result<Statement> {
    let values_at = upper.find(" VALUES").ok_or_else(|| unparsable(sql))?;
    let name = sql["INSERT INTO".len()..values_at].trim();
    if name.is_empty() {
        return Err(unparsable(sql));
    }
    let tail = &sql[values_at + " VALUES".len()..];
    let open = tail.find('(').ok_or_else(|| unparsable(sql))?;
    let close = tail.rfind(')').ok_or_else(|| unparsable(sql))?;
    if close < open {
        return Err(unparsable(sql));
    }

    let mut next_param = 0;
    let values = split_terms(&tail[open + 1..close])
        .iter()
        .map(|raw| parse_term(raw, &mut next_param))
        .collect::<Result<Vec<Term>>>()?;
    Ok(Statement::Insert {
        name: name.to_owned(),
        values,
    })
}

/// Split on commas that are not inside a quoted string.
fn split_terms(list: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for c in list.chars() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                current.push(c);
            }
            ',' if !in_quote => {
                parts.push(current.trim().to_owned());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let last = current.trim();
    if !last.is_empty() {
        parts.push(last.to_owned());
    }
    parts
}

fn parse_term(raw: &str, next_param: &mut usize) -> Result<Term> {
    if raw == "?" {
        let index = *next_param;
        *next_param += 1;
        return Ok(Term::Param(index));
    }
    if raw.eq_ignore_ascii_case("NULL") {
        return Ok(Term::Literal(Value::Null));
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        let text = raw[1..raw.len() - 1].replace("''", "'");
        return Ok(Term::Literal(Value::Text(text)));
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(Term::Literal(Value::Integer(i)));
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Ok(Term::Literal(Value::Real(f)));
    }
    Err(LagoonError::internal(format!("unparsable literal: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_takes_first_token_per_column() {
        let stmt = parse("CREATE TABLE users (id INTEGER, name TEXT)").unwrap();
        assert_eq!(
            stmt,
            Statement::CreateTable {
                name: "users".to_owned(),
                columns: vec!["id".to_owned(), "name".to_owned()],
            }
        );
    }

    #[test]
    fn insert_literals_and_params() {
        let stmt = parse("insert into t values (1, 'a, b', ?, NULL, 2.5, ?)").unwrap();
        let Statement::Insert { name, values } = stmt else {
            panic!("expected insert");
        };
        assert_eq!(name, "t");
        assert_eq!(values[0], Term::Literal(Value::Integer(1)));
        assert_eq!(values[1], Term::Literal(Value::Text("a, b".to_owned())));
        assert_eq!(values[2], Term::Param(0));
        assert_eq!(values[3], Term::Literal(Value::Null));
        assert_eq!(values[4], Term::Literal(Value::Real(2.5)));
        assert_eq!(values[5], Term::Param(1));
    }

    #[test]
    fn quote_escape() {
        let stmt = parse("INSERT INTO t VALUES ('it''s')").unwrap();
        let Statement::Insert { values, .. } = stmt else {
            panic!("expected insert");
        };
        assert_eq!(values[0], Term::Literal(Value::Text("it's".to_owned())));
    }

    #[test]
    fn simple_forms() {
        assert_eq!(
            parse("SELECT * FROM t;").unwrap(),
            Statement::SelectAll { name: "t".to_owned() }
        );
        assert_eq!(
            parse("select count(*) from t").unwrap(),
            Statement::SelectCount { name: "t".to_owned() }
        );
        assert_eq!(
            parse("DELETE FROM t").unwrap(),
            Statement::DeleteAll { name: "t".to_owned() }
        );
        assert_eq!(
            parse("DROP TABLE t").unwrap(),
            Statement::DropTable { name: "t".to_owned() }
        );
    }

    #[test]
    fn rejects_out_of_dialect_sql() {
        assert!(parse("UPDATE t SET a = 1").is_err());
        assert!(parse("SELECT a, b FROM t").is_err());
        assert!(parse("CREATE TABLE t").is_err());
        assert!(parse("INSERT INTO t VALUES (unquoted)").is_err());
    }
}
