use serde::{Deserialize, Serialize};
use std::fmt;

/// A parsed DBML document: the authoritative description of tables,
/// columns and relationships.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub project: Option<String>,
    pub tables: Vec<Table>,
    pub relationships: Vec<Relationship>,
    pub enums: Vec<EnumType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub schema: Option<String>,
    pub name: String,
    pub alias: Option<String>,
    pub columns: Vec<Column>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub primary_key: bool,
    pub not_null: bool,
    pub unique: bool,
    pub increment: bool,
    pub default: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub name: Option<String>,
    pub from: Endpoint,
    pub to: Endpoint,
    pub cardinality: Cardinality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub schema: Option<String>,
    pub table: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    /// `>`
    ManyToOne,
    /// `<`
    OneToMany,
    /// `-`
    OneToOne,
    /// `<>`
    ManyToMany,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Timestamp,
    Boolean,
    Integer,
    Float,
    Text,
    Other,
}

/// A relationship endpoint that points at a table or column the schema does not define.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    pub relationship: String,
    pub table: String,
    pub column: Option<String>,
}

impl Schema {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.name == name || t.alias.as_deref() == Some(name))
    }

    pub fn dangling_references(&self) -> Vec<DanglingReference> {
        let mut dangling = Vec::new();

        for relationship in &self.relationships {
            for endpoint in [&relationship.from, &relationship.to] {
                match self.table(&endpoint.table) {
                    None => dangling.push(DanglingReference {
                        relationship: relationship.to_string(),
                        table: endpoint.table.clone(),
                        column: None,
                    }),
                    Some(table) => {
                        for column in &endpoint.columns {
                            if table.column(column).is_none() {
                                dangling.push(DanglingReference {
                                    relationship: relationship.to_string(),
                                    table: endpoint.table.clone(),
                                    column: Some(column.clone()),
                                });
                            }
                        }
                    }
                }
            }
        }

        dangling
    }

    /// Relationships whose two endpoints both resolve to one of `tables`.
    pub fn relationships_between<'a>(
        &'a self,
        tables: &'a [Table],
    ) -> impl Iterator<Item = &'a Relationship> + 'a {
        let selected = move |name: &str| {
            self.table(name)
                .map(|t| tables.iter().any(|s| s.name == t.name))
                .unwrap_or(false)
        };
        self.relationships
            .iter()
            .filter(move |r| selected(&r.from.table) && selected(&r.to.table))
    }
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn columns_of_kind(&self, kind: ColumnKind) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.kind() == kind)
            .map(|c| c.name.as_str())
            .collect()
    }
}

impl Column {
    pub fn kind(&self) -> ColumnKind {
        let ty = self.data_type.to_lowercase();
        let base = ty.split('(').next().unwrap_or("").trim();

        if base.contains("timestamp") || base.contains("datetime") || base == "date" || base == "time"
        {
            ColumnKind::Timestamp
        } else if base.starts_with("bool") {
            ColumnKind::Boolean
        } else if base.contains("int") || base.contains("serial") {
            ColumnKind::Integer
        } else if ["float", "double", "decimal", "numeric", "real", "money"]
            .iter()
            .any(|k| base.contains(k))
        {
            ColumnKind::Float
        } else if ["char", "text", "string", "uuid", "json"]
            .iter()
            .any(|k| base.contains(k))
        {
            ColumnKind::Text
        } else {
            ColumnKind::Other
        }
    }
}

impl Cardinality {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::ManyToOne => ">",
            Self::OneToMany => "<",
            Self::OneToOne => "-",
            Self::ManyToMany => "<>",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(schema) = &self.schema {
            write!(f, "{}.", schema)?;
        }
        match self.columns.as_slice() {
            [single] => write!(f, "{}.{}", self.table, single),
            many => write!(f, "{}.({})", self.table, many.join(", ")),
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.from, self.cardinality.symbol(), self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, data_type: &str) -> Column {
        Column {
            name: name.to_string(),
            data_type: data_type.to_string(),
            ..Column::default()
        }
    }

    #[test]
    fn test_column_kind_classification() {
        assert_eq!(column("a", "timestamp").kind(), ColumnKind::Timestamp);
        assert_eq!(column("a", "timestamptz").kind(), ColumnKind::Timestamp);
        assert_eq!(column("a", "DATETIME").kind(), ColumnKind::Timestamp);
        assert_eq!(column("a", "date").kind(), ColumnKind::Timestamp);
        assert_eq!(column("a", "boolean").kind(), ColumnKind::Boolean);
        assert_eq!(column("a", "bigint").kind(), ColumnKind::Integer);
        assert_eq!(column("a", "decimal(10,2)").kind(), ColumnKind::Float);
        assert_eq!(column("a", "varchar(255)").kind(), ColumnKind::Text);
        assert_eq!(column("a", "geometry").kind(), ColumnKind::Other);
    }

    #[test]
    fn test_dangling_references() {
        let schema = Schema {
            tables: vec![Table {
                schema: None,
                name: "users".to_string(),
                alias: Some("U".to_string()),
                columns: vec![column("id", "int")],
                note: None,
            }],
            relationships: vec![Relationship {
                name: None,
                from: Endpoint {
                    schema: None,
                    table: "orders".to_string(),
                    columns: vec!["user_id".to_string()],
                },
                to: Endpoint {
                    schema: None,
                    table: "U".to_string(),
                    columns: vec!["uuid".to_string()],
                },
                cardinality: Cardinality::ManyToOne,
            }],
            ..Schema::default()
        };

        let dangling = schema.dangling_references();
        assert_eq!(dangling.len(), 2);
        assert_eq!(dangling[0].table, "orders");
        assert_eq!(dangling[0].column, None);
        assert_eq!(dangling[1].column.as_deref(), Some("uuid"));
        assert_eq!(dangling[1].relationship, "orders.user_id > U.uuid");
    }
}
