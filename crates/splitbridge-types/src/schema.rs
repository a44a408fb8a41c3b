//! Declared schema of a reader: an ordered list of named, typed fields.
//!
//! The schema is immutable for the lifetime of a reader instance.  It is
//! shared (behind an `Arc`) by the connector reader, which learns the field
//! names and types through its context, and by the row converter.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use thiserror::Error as ThisError;

/// Type of a single field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Boolean,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Binary,
    Date,
    Time,
    Timestamp,
    List(Box<TypeDescriptor>),
    Map(Box<TypeDescriptor>, Box<TypeDescriptor>),
}

impl TypeDescriptor {
    /// Returns true for types whose values are made of other values.
    pub fn is_nested(&self) -> bool {
        matches!(self, Self::List(_) | Self::Map(_, _))
    }
}

impl Display for TypeDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Boolean => write!(f, "boolean"),
            Self::Short => write!(f, "short"),
            Self::Int => write!(f, "int"),
            Self::Long => write!(f, "long"),
            Self::Float => write!(f, "float"),
            Self::Double => write!(f, "double"),
            Self::String => write!(f, "string"),
            Self::Binary => write!(f, "binary"),
            Self::Date => write!(f, "date"),
            Self::Time => write!(f, "time"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::List(element) => write!(f, "list<{element}>"),
            Self::Map(key, value) => write!(f, "map<{key},{value}>"),
        }
    }
}

/// Error parsing a type name.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
#[error("unknown type '{type_name}'")]
pub struct UnknownTypeError {
    pub type_name: String,
}

impl FromStr for TypeDescriptor {
    type Err = UnknownTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownTypeError {
            type_name: s.to_string(),
        };
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();

        if let Some(inner) = strip_generic(&lower, "list").or_else(|| strip_generic(&lower, "array"))
        {
            let element = inner.parse().map_err(|_| unknown())?;
            return Ok(Self::List(Box::new(element)));
        }
        if let Some(inner) = strip_generic(&lower, "map") {
            let (key, value) = split_top_level_comma(inner).ok_or_else(unknown)?;
            let key = key.parse().map_err(|_| unknown())?;
            let value = value.parse().map_err(|_| unknown())?;
            return Ok(Self::Map(Box::new(key), Box::new(value)));
        }

        match lower.as_str() {
            "boolean" | "bool" => Ok(Self::Boolean),
            "short" | "smallint" => Ok(Self::Short),
            "int" | "integer" => Ok(Self::Int),
            "long" | "bigint" => Ok(Self::Long),
            "float" | "real" => Ok(Self::Float),
            "double" => Ok(Self::Double),
            "string" | "varchar" | "text" => Ok(Self::String),
            "binary" | "bytes" | "varbinary" => Ok(Self::Binary),
            "date" => Ok(Self::Date),
            "time" => Ok(Self::Time),
            "timestamp" | "datetime" => Ok(Self::Timestamp),
            _ => Err(unknown()),
        }
    }
}

/// `list<int>` with `name = "list"` returns `Some("int")`.
fn strip_generic<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    s.strip_prefix(name)?
        .trim_start()
        .strip_prefix('<')?
        .strip_suffix('>')
}

/// Splits `k,v` at the first comma that is not nested inside `<...>`.
fn split_top_level_comma(s: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => return Some((&s[..i], &s[i + 1..])),
            _ => (),
        }
    }
    None
}

impl Serialize for TypeDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TypeDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A named, typed field of a [`Schema`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeDescriptor,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Errors building a [`Schema`].
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema must declare at least one column")]
    Empty,

    #[error("column '{column}' is declared more than once")]
    DuplicateColumn { column: String },

    #[error("column '{column}': {error}")]
    UnknownType {
        column: String,
        error: UnknownTypeError,
    },
}

/// Ordered sequence of fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Field>", into = "Vec<Field>")]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Creates a schema, rejecting empty schemas and duplicate field names.
    pub fn new(fields: Vec<Field>) -> Result<Self, SchemaError> {
        if fields.is_empty() {
            return Err(SchemaError::Empty);
        }
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(SchemaError::DuplicateColumn {
                    column: field.name.clone(),
                });
            }
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.fields.iter().map(|f| &f.ty)
    }

    /// Returns the position of the field named `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

impl TryFrom<Vec<Field>> for Schema {
    type Error = SchemaError;

    fn try_from(fields: Vec<Field>) -> Result<Self, Self::Error> {
        Self::new(fields)
    }
}

impl From<Schema> for Vec<Field> {
    fn from(schema: Schema) -> Self {
        schema.fields
    }
}
