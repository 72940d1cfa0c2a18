use serde::{Deserialize, Serialize};

/// One column as reported by schema introspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default)]
    pub has_index: bool,
}

impl ColumnMetadata {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            comment: String::new(),
            is_primary: false,
            is_unique: false,
            has_index: false,
        }
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.has_index = true;
        self
    }
}

/// One foreign key constraint. Multi-column keys keep their column order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    #[serde(default)]
    pub comment: String,
    pub columns: Vec<ColumnMetadata>,
    /// Names of columns covered by secondary indexes.
    #[serde(default)]
    pub key_indexes: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyRef>,
    /// A few example rows, used to enrich generation prompts.
    #[serde(default)]
    pub sample_rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

impl TableMetadata {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            comment: String::new(),
            columns: Vec::new(),
            key_indexes: Vec::new(),
            foreign_keys: Vec::new(),
            sample_rows: Vec::new(),
        }
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }

    pub fn with_columns(mut self, columns: Vec<ColumnMetadata>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_foreign_key(mut self, column: &str, referenced_table: &str, referenced_column: &str) -> Self {
        self.foreign_keys.push(ForeignKeyRef {
            columns: vec![column.to_string()],
            referenced_table: referenced_table.to_string(),
            referenced_columns: vec![referenced_column.to_string()],
        });
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_primary)
            .map(|c| c.name.as_str())
            .collect()
    }
}
