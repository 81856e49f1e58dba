//! Scopes: filtered views over one table
//!
//! A scope decides which stored rows a sync may delete (and which rows the
//! naive path may match). Predicates are rendered through [`SqlWriter`], so
//! filter values are always bound parameters.

use crate::codec::RowCodec;
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::schema::{Field, Table};
use crate::sql::{SqlWriter, Statement};
use crate::value::{SqlValue, Value};

/// Comparison operator of a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
}

impl Comparison {
    /// SQL operator
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

/// One condition of a scope; conditions are joined with `AND`
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `field <op> value`
    Compare {
        /// Field name
        field: String,
        /// Operator
        op: Comparison,
        /// Right-hand side
        value: Value,
    },
    /// `field IN (values...)`
    In {
        /// Field name
        field: String,
        /// Candidates
        values: Vec<Value>,
    },
    /// `field IS NULL`
    IsNull(String),
    /// `field IS NOT NULL`
    NotNull(String),
}

/// A table plus the predicates selecting rows from it
#[derive(Debug, Clone)]
pub struct Scope<'t> {
    table: &'t Table,
    predicates: Vec<Predicate>,
}

impl<'t> Scope<'t> {
    /// Every row of `table`
    pub const fn all(table: &'t Table) -> Self {
        Self {
            table,
            predicates: Vec::new(),
        }
    }

    /// The scoped table
    pub const fn table(&self) -> &'t Table {
        self.table
    }

    /// Conditions, in the order they were added
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Add an arbitrary predicate
    #[must_use]
    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// `field <op> value`
    #[must_use]
    pub fn filter(self, field: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        self.with(Predicate::Compare {
            field: field.into(),
            op,
            value: value.into(),
        })
    }

    /// `field = value`
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Comparison::Eq, value)
    }

    /// `field IN (values...)`
    #[must_use]
    pub fn is_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.with(Predicate::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    /// `field IS NULL`
    #[must_use]
    pub fn is_null(self, field: impl Into<String>) -> Self {
        self.with(Predicate::IsNull(field.into()))
    }

    /// `field IS NOT NULL`
    #[must_use]
    pub fn not_null(self, field: impl Into<String>) -> Self {
        self.with(Predicate::NotNull(field.into()))
    }

    /// Append ` WHERE ...` for this scope (nothing when unfiltered)
    pub fn write_where(&self, w: &mut SqlWriter) -> Result<()> {
        let codec = RowCodec::new(self.table, w.dialect());
        for (i, predicate) in self.predicates.iter().enumerate() {
            w.push(if i == 0 { " WHERE " } else { " AND " });
            match predicate {
                Predicate::Compare { field, op, value } => {
                    let field = self.table.field(field)?;
                    match (op, value.is_null()) {
                        (Comparison::Eq, true) => {
                            w.ident(&field.column).push(" IS NULL");
                        }
                        (Comparison::Ne, true) => {
                            w.ident(&field.column).push(" IS NOT NULL");
                        }
                        (_, true) => {
                            return Err(Error::Validation(format!(
                                "Cannot order-compare '{}' against NULL",
                                field.name
                            )));
                        }
                        (_, false) => {
                            let bound = codec
                                .encode_value(field, value.clone(), 0)
                                .map_err(|err| invalid_filter(&field.name, &err))?;
                            w.ident(&field.column)
                                .push(" ")
                                .push(op.as_sql())
                                .push(" ")
                                .bind(bound);
                        }
                    }
                }
                Predicate::In { field, values } => {
                    let field = self.table.field(field)?;
                    if values.is_empty() {
                        w.push("1 = 0");
                        continue;
                    }
                    w.ident(&field.column).push(" IN (");
                    for (j, value) in values.iter().enumerate() {
                        if j > 0 {
                            w.push(", ");
                        }
                        let bound = codec
                            .encode_value(field, value.clone(), 0)
                            .map_err(|err| invalid_filter(&field.name, &err))?;
                        w.bind(bound);
                    }
                    w.push(")");
                }
                Predicate::IsNull(field) => {
                    let field = self.table.field(field)?;
                    w.ident(&field.column).push(" IS NULL");
                }
                Predicate::NotNull(field) => {
                    let field = self.table.field(field)?;
                    w.ident(&field.column).push(" IS NOT NULL");
                }
            }
        }
        Ok(())
    }
}

impl Scope<'_> {
    /// `SELECT fields FROM t ... ORDER BY pk`
    pub fn select(&self, dialect: Dialect, fields: &[&Field]) -> Result<Statement> {
        let mut w = SqlWriter::new(dialect);
        w.push("SELECT ")
            .ident_list(fields.iter().map(|field| field.column.as_str()))
            .push(" FROM ")
            .ident(self.table.name());
        self.write_where(&mut w)?;
        w.push(" ORDER BY ").ident(&self.table.primary_key().column);
        Ok(w.finish())
    }

    /// `UPDATE t SET column = value, ... WHERE ...`
    pub fn update(&self, dialect: Dialect, assignments: &[(&Field, SqlValue)]) -> Result<Statement> {
        if assignments.is_empty() {
            return Err(Error::Validation("update needs at least one assignment".into()));
        }
        let mut w = SqlWriter::new(dialect);
        w.push("UPDATE ").ident(self.table.name()).push(" SET ");
        for (i, (field, value)) in assignments.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.ident(&field.column).push(" = ").bind(value.clone());
        }
        self.write_where(&mut w)?;
        Ok(w.finish())
    }
}

fn invalid_filter(field: &str, err: &Error) -> Error {
    Error::Validation(format!("Invalid filter value for '{field}': {err}"))
}

impl Table {
    /// Scope over every row of this table
    pub const fn all(&self) -> Scope<'_> {
        Scope::all(self)
    }
}

/// Outcome of a single-row lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<R> {
    /// Nothing matched
    Missing,
    /// Exactly one row matched
    One(R),
    /// More than one row matched
    Multiple(usize),
}

impl<R> Lookup<R> {
    /// The row, if exactly one matched
    pub fn one(self) -> Option<R> {
        match self {
            Self::One(record) => Some(record),
            Self::Missing | Self::Multiple(_) => None,
        }
    }
}
