//! Record schemas carried by load operators. Pure data.
//!
//! Schemas are optional everywhere: a load without a declared schema, or the
//! output of an external streaming command, is simply unknown downstream.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Binary,
}

impl DataType {
    pub fn is_integer(self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Keep only `columns`, in the given order. `None` if any column is missing.
    pub fn project(&self, columns: &[String]) -> Option<Schema> {
        columns
            .iter()
            .map(|c| self.field(c).cloned())
            .collect::<Option<Vec<_>>>()
            .map(Schema::new)
    }

    /// Concatenate schemas side by side (join output).
    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a Schema>) -> Schema {
        Schema::new(
            parts
                .into_iter()
                .flat_map(|s| s.fields.iter().cloned())
                .collect(),
        )
    }
}
