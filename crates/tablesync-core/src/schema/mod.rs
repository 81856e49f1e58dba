//! Table descriptors
//!
//! A [`Table`] is the typed schema the engine works from: ordered fields with
//! their storage column, kind, key flags and auto-population behavior.

mod classify;

pub use classify::{classify, Classification};

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Storage kind of a field, driving value coercion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// 64-bit integer
    Integer,
    /// Double precision float
    Real,
    /// Text
    Text,
    /// Boolean
    Boolean,
    /// UTC timestamp
    Timestamp,
    /// JSON document
    Json,
    /// UUID
    Uuid,
    /// Raw bytes
    Blob,
    /// Integer or float as given, with numeric text narrowed to a number
    Numeric,
    /// Any scalar, stored as given
    Any,
    /// Text restricted to the listed variants
    Enum(Vec<String>),
}

impl FieldKind {
    /// Postgres type used to cast the first row of a `VALUES` list
    pub const fn postgres_type(&self) -> &'static str {
        match self {
            Self::Integer => "bigint",
            Self::Real => "double precision",
            Self::Text | Self::Enum(_) => "text",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamptz",
            Self::Json => "jsonb",
            Self::Uuid => "uuid",
            Self::Blob => "bytea",
            Self::Numeric => "numeric",
            Self::Any => "text",
        }
    }

    /// Map a declared `SQLite` column type onto a field kind
    ///
    /// Follows the engine's affinity rules after the names it has no
    /// affinity for (booleans, timestamps, JSON, UUIDs).
    pub fn from_sqlite_decl(decl: &str) -> Self {
        let decl = decl.trim().to_ascii_uppercase();
        if decl.contains("BOOL") {
            Self::Boolean
        } else if decl.contains("TIMESTAMP") || decl.contains("DATETIME") {
            Self::Timestamp
        } else if decl.contains("JSON") {
            Self::Json
        } else if decl.contains("UUID") {
            Self::Uuid
        } else if decl.contains("INT") {
            Self::Integer
        } else if decl.contains("CHAR") || decl.contains("CLOB") || decl.contains("TEXT") {
            Self::Text
        } else if decl.contains("BLOB") {
            Self::Blob
        } else if decl.is_empty() {
            Self::Any
        } else if decl.contains("REAL") || decl.contains("FLOA") || decl.contains("DOUB") {
            Self::Real
        } else {
            Self::Numeric
        }
    }
}

/// When the engine populates a field by itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoPopulate {
    /// Caller provides the value
    #[default]
    Never,
    /// Set once, when the row is created
    OnCreate,
    /// Set on every write
    OnWrite,
}

/// A single field of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// In-memory attribute name
    pub name: String,
    /// Storage column name
    pub column: String,
    /// Value kind
    pub kind: FieldKind,
    /// Part of the primary key
    pub primary_key: bool,
    /// Generated by the server on insert
    pub identity: bool,
    /// NULL allowed
    pub nullable: bool,
    /// Auto-population behavior
    pub auto: AutoPopulate,
    /// Upper bound on text length, checked client-side
    pub max_length: Option<usize>,
}

impl Field {
    /// Create a field whose column name equals its attribute name
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            kind,
            primary_key: false,
            identity: false,
            nullable: false,
            auto: AutoPopulate::Never,
            max_length: None,
        }
    }

    /// Integer field
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    /// Float field
    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Real)
    }

    /// Text field
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    /// Boolean field
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    /// Timestamp field
    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Timestamp)
    }

    /// JSON field
    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Json)
    }

    /// UUID field
    pub fn uuid(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Uuid)
    }

    /// Enum field stored as text
    pub fn enumeration<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            FieldKind::Enum(variants.into_iter().map(Into::into).collect()),
        )
    }

    /// Store under a different column name
    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Mark as the primary key
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark as server-generated (e.g. `INTEGER PRIMARY KEY`, `SERIAL`)
    #[must_use]
    pub const fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    /// Allow NULL
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set on every write
    #[must_use]
    pub const fn auto_now(mut self) -> Self {
        self.auto = AutoPopulate::OnWrite;
        self
    }

    /// Set only when the row is created
    #[must_use]
    pub const fn auto_now_add(mut self) -> Self {
        self.auto = AutoPopulate::OnCreate;
        self
    }

    /// Limit text length
    #[must_use]
    pub const fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Whether the engine fills this field in
    pub fn is_auto(&self) -> bool {
        self.auto != AutoPopulate::Never
    }
}

/// A table: a name plus ordered fields with exactly one primary key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    name: String,
    fields: Vec<Field>,
    pk: usize,
}

impl Table {
    /// Build and validate a table descriptor
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::Validation("Table name must not be empty".into()));
        }

        let mut names = HashSet::new();
        let mut columns = HashSet::new();
        for field in &fields {
            if !names.insert(field.name.as_str()) {
                return Err(Error::Validation(format!(
                    "Duplicate field '{}' on table '{name}'",
                    field.name
                )));
            }
            if !columns.insert(field.column.as_str()) {
                return Err(Error::Validation(format!(
                    "Duplicate column '{}' on table '{name}'",
                    field.column
                )));
            }
            if field.is_auto() && field.kind != FieldKind::Timestamp {
                return Err(Error::Validation(format!(
                    "Auto-populated field '{}' must be a timestamp",
                    field.name
                )));
            }
        }

        let mut keys = fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.primary_key)
            .map(|(idx, _)| idx);
        let pk = match (keys.next(), keys.next()) {
            (Some(idx), None) => idx,
            (None, _) => {
                return Err(Error::Validation(format!(
                    "Table '{name}' has no primary key"
                )))
            }
            (Some(_), Some(_)) => {
                return Err(Error::Validation(format!(
                    "Table '{name}' declares a composite primary key, which is not supported"
                )))
            }
        };

        Ok(Self { name, fields, pk })
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All fields, in declaration order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// The primary key field
    pub fn primary_key(&self) -> &Field {
        &self.fields[self.pk]
    }

    /// Look a field up by attribute name
    pub fn field(&self, name: &str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .ok_or_else(|| Error::UnknownField {
                table: self.name.clone(),
                field: name.to_string(),
            })
    }

    /// Look a field up by storage column name
    pub fn field_by_column(&self, column: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.column == column)
    }

    /// Resolve a list of attribute names, preserving caller order
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<&Field>> {
        names.iter().map(|name| self.field(name.as_ref())).collect()
    }

    /// Fields set automatically by the engine
    pub fn auto_fields(&self) -> impl Iterator<Item = &Field> + '_ {
        self.fields.iter().filter(|field| field.is_auto())
    }
}
