//! Parametrized statement writer
//!
//! Every identifier goes through [`SqlWriter::ident`] and every value through
//! [`SqlWriter::bind`]; no caller-supplied data is ever spliced into SQL text.

use std::fmt;

use crate::dialect::Dialect;
use crate::schema::FieldKind;
use crate::value::SqlValue;

/// SQL text plus its positional parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// Rendered SQL
    pub sql: String,
    /// Bound values, in placeholder order
    pub params: Vec<SqlValue>,
}

impl Statement {
    /// A statement without parameters
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -- {} params", self.sql, self.params.len())
    }
}

/// Incrementally builds a [`Statement`] for one dialect
#[derive(Debug)]
pub struct SqlWriter {
    dialect: Dialect,
    sql: String,
    params: Vec<SqlValue>,
}

impl SqlWriter {
    /// Start an empty statement
    pub const fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Target dialect
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Append structural SQL
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Append a quoted identifier
    pub fn ident(&mut self, name: &str) -> &mut Self {
        let quoted = self.dialect.quote(name);
        self.sql.push_str(&quoted);
        self
    }

    /// Append `qualifier."name"`
    pub fn qualified(&mut self, qualifier: &str, name: &str) -> &mut Self {
        self.sql.push_str(qualifier);
        self.sql.push('.');
        self.ident(name)
    }

    /// Append a comma-separated list of quoted identifiers
    pub fn ident_list<'a, I>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        for (i, name) in names.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.ident(name);
        }
        self
    }

    /// Append a placeholder and bind `value` to it
    pub fn bind(&mut self, value: SqlValue) -> &mut Self {
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
        self
    }

    /// Bind with an explicit type cast where the dialect needs one
    ///
    /// Postgres cannot infer types of untyped `VALUES` parameters, so the first
    /// row of a literal relation carries casts.
    pub fn bind_typed(&mut self, value: SqlValue, kind: &FieldKind) -> &mut Self {
        self.bind(value);
        if self.dialect == Dialect::Postgres {
            self.sql.push_str("::");
            self.sql.push_str(kind.postgres_type());
        }
        self
    }

    /// Append `(?, ?, ...)` for one row, casting when `kinds` is given
    pub fn bind_row<I>(&mut self, values: I, kinds: Option<&[&FieldKind]>) -> &mut Self
    where
        I: IntoIterator<Item = SqlValue>,
    {
        self.sql.push('(');
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            match kinds.and_then(|kinds| kinds.get(i)) {
                Some(kind) => self.bind_typed(value, kind),
                None => self.bind(value),
            };
        }
        self.sql.push(')');
        self
    }

    /// Finish the statement
    pub fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_separates_identifiers_and_values() {
        let mut w = SqlWriter::new(Dialect::Sqlite);
        w.push("SELECT ")
            .ident_list(["a", "b\"c"])
            .push(" FROM ")
            .ident("t")
            .push(" WHERE ")
            .ident("a")
            .push(" = ")
            .bind(SqlValue::Text("x'; DROP TABLE t; --".into()));
        let stmt = w.finish();
        assert_eq!(stmt.sql, "SELECT \"a\", \"b\"\"c\" FROM \"t\" WHERE \"a\" = ?");
        assert_eq!(stmt.params, vec![SqlValue::Text("x'; DROP TABLE t; --".into())]);
    }

    #[test]
    fn test_postgres_row_casts() {
        let mut w = SqlWriter::new(Dialect::Postgres);
        let kinds = [&FieldKind::Integer, &FieldKind::Text];
        w.bind_row([SqlValue::Integer(1), SqlValue::Text("a".into())], Some(&kinds[..]))
            .push(", ")
            .bind_row([SqlValue::Integer(2), SqlValue::Text("b".into())], None);
        assert_eq!(w.finish().sql, "($1::bigint, $2::text), ($3, $4)");
    }
}
