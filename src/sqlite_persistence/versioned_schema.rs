use anyhow::{bail, Result};
use rusqlite::{params, Connection};

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            // Allow unused_mut because the variable is only mutated when optional
            // field assignments are passed to the macro (e.g., `is_primary_key = true`)
            #[allow(unused_mut)]
            let mut column = $crate::sqlite_persistence::Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                is_unique: false,
                default_value: None,
                foreign_key: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
        }
    }
}

#[allow(unused)]
pub enum ForeignKeyOnChange {
    NoAction,
    Restrict,
    SetNull,
    Cascade,
}

impl ForeignKeyOnChange {
    fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyOnChange::NoAction => "NO ACTION",
            ForeignKeyOnChange::Restrict => "RESTRICT",
            ForeignKeyOnChange::SetNull => "SET NULL",
            ForeignKeyOnChange::Cascade => "CASCADE",
        }
    }
}

pub struct ForeignKey {
    pub foreign_table: &'static str,
    pub foreign_column: &'static str,
    pub on_delete: ForeignKeyOnChange,
}

pub struct Column<'a, S: AsRef<str>> {
    pub name: S,
    pub sql_type: &'a SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub is_unique: bool,
    pub default_value: Option<S>,
    pub foreign_key: Option<&'a ForeignKey>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column<'static, &'static str>],
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl Table {
    fn create_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|column| {
                let mut sql = format!("{} {}", column.name, column.sql_type.as_sql());
                if column.is_primary_key {
                    sql.push_str(" PRIMARY KEY");
                }
                if column.non_null {
                    sql.push_str(" NOT NULL");
                }
                if column.is_unique {
                    sql.push_str(" UNIQUE");
                }
                if let Some(default_value) = column.default_value {
                    sql.push_str(&format!(" DEFAULT {}", default_value));
                }
                if let Some(foreign_key) = column.foreign_key {
                    sql.push_str(&format!(
                        " REFERENCES {}({}) ON DELETE {}",
                        foreign_key.foreign_table,
                        foreign_key.foreign_column,
                        foreign_key.on_delete.as_sql()
                    ));
                }
                sql
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut create_sql = format!("CREATE TABLE IF NOT EXISTS {} ({}", self.name, columns);
        for unique_constraint in self.unique_constraints {
            create_sql.push_str(&format!(", UNIQUE ({})", unique_constraint.join(", ")));
        }
        create_sql.push_str(");");
        create_sql
    }

    /// Creates the table and its indices unless they already exist.
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute(&self.create_sql(), params![])?;
        for (index_name, column_name) in self.indices {
            conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {}({});",
                    index_name, self.name, column_name
                ),
                params![],
            )?;
        }
        Ok(())
    }

    pub fn drop(&self, conn: &Connection) -> Result<()> {
        conn.execute(&format!("DROP TABLE IF EXISTS {};", self.name), params![])?;
        Ok(())
    }

    pub fn exists(&self, conn: &Connection) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            params![self.name],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    fn validate_columns(&self, conn: &Connection) -> Result<()> {
        let found = conn
            .prepare(&format!("PRAGMA table_info({})", self.name))?
            .query_map([], ColumnShape::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let declared: Vec<ColumnShape> = self.columns.iter().map(ColumnShape::declared).collect();
        if found == declared {
            return Ok(());
        }

        if found.len() != declared.len() {
            bail!(
                "Table {} has columns ({}), declared ({})",
                self.name,
                ColumnShape::names(&found),
                ColumnShape::names(&declared)
            );
        }
        for (found, declared) in found.iter().zip(&declared) {
            if found != declared {
                bail!(
                    "Table {} column {} is {:?}, declared {:?}",
                    self.name,
                    declared.name,
                    found,
                    declared
                );
            }
        }
        Ok(())
    }

    fn validate_indices(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(
            "SELECT 1 FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND name = ?2",
        )?;
        for (index_name, _) in self.indices {
            if !stmt.exists(params![self.name, index_name])? {
                bail!("Table {} is missing index '{}'", self.name, index_name);
            }
        }
        Ok(())
    }

    /// Unique constraints show up as unique entries of `PRAGMA index_list`.
    fn validate_unique_constraints(&self, conn: &Connection) -> Result<()> {
        if self.unique_constraints.is_empty() {
            return Ok(());
        }
        let unique_indices = conn
            .prepare(&format!("PRAGMA index_list({})", self.name))?
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, bool>(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut column_sets = Vec::new();
        for (index_name, _) in unique_indices.iter().filter(|(_, unique)| *unique) {
            let mut columns = conn
                .prepare(&format!("PRAGMA index_info({})", index_name))?
                .query_map([], |row| row.get::<_, String>(2))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            columns.sort();
            column_sets.push(columns);
        }

        for constraint in self.unique_constraints {
            let mut wanted: Vec<&str> = constraint.to_vec();
            wanted.sort_unstable();
            let present = column_sets
                .iter()
                .any(|columns| columns.iter().map(String::as_str).eq(wanted.iter().copied()));
            if !present {
                bail!(
                    "Table {} is missing unique constraint on columns ({})",
                    self.name,
                    constraint.join(", ")
                );
            }
        }
        Ok(())
    }

    fn validate_foreign_keys(&self, conn: &Connection) -> Result<()> {
        let found = conn
            .prepare(&format!("PRAGMA foreign_key_list({})", self.name))?
            .query_map([], ForeignKeyShape::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for column in self.columns {
            let Some(declared) = ForeignKeyShape::declared(column) else {
                continue;
            };
            if found.contains(&declared) {
                continue;
            }
            let actual = found
                .iter()
                .find(|fk| fk.column == declared.column)
                .map_or_else(|| "nothing".to_string(), ForeignKeyShape::describe);
            bail!(
                "Table {} column {} should reference {}, references {}",
                self.name,
                column.name,
                declared.describe(),
                actual
            );
        }
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        self.validate_columns(conn)?;
        self.validate_indices(conn)?;
        self.validate_unique_constraints(conn)?;
        self.validate_foreign_keys(conn)
    }
}

/// A column as `PRAGMA table_info` reports it.
#[derive(Debug, PartialEq)]
struct ColumnShape {
    name: String,
    sql_type: String,
    non_null: bool,
    default_value: Option<String>,
    primary_key: bool,
}

impl ColumnShape {
    fn declared(column: &Column<'_, &str>) -> Self {
        Self {
            name: column.name.to_string(),
            sql_type: column.sql_type.as_sql().to_string(),
            non_null: column.non_null,
            default_value: column.default_value.map(unparenthesize),
            primary_key: column.is_primary_key,
        }
    }

    // cid, name, type, notnull, dflt_value, pk
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(1)?,
            sql_type: row.get(2)?,
            non_null: row.get(3)?,
            default_value: row.get::<_, Option<String>>(4)?.map(unparenthesize),
            primary_key: row.get::<_, i64>(5)? > 0,
        })
    }

    fn names(shapes: &[ColumnShape]) -> String {
        shapes
            .iter()
            .map(|shape| shape.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, PartialEq)]
struct ForeignKeyShape {
    column: String,
    table: String,
    to: String,
    on_delete: String,
}

impl ForeignKeyShape {
    fn declared(column: &Column<'_, &str>) -> Option<Self> {
        column.foreign_key.map(|fk| Self {
            column: column.name.to_string(),
            table: fk.foreign_table.to_string(),
            to: fk.foreign_column.to_string(),
            on_delete: fk.on_delete.as_sql().to_string(),
        })
    }

    // id, seq, table, from, to, on_update, on_delete, match
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            column: row.get(3)?,
            table: row.get(2)?,
            to: row.get(4)?,
            on_delete: row.get(6)?,
        })
    }

    fn describe(&self) -> String {
        format!("{}({}) ON DELETE {}", self.table, self.to, self.on_delete)
    }
}

/// SQLite may report a default wrapped in parentheses.
fn unparenthesize<S: AsRef<str>>(value: S) -> String {
    let value = value.as_ref();
    value
        .strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
        .unwrap_or(value)
        .to_string()
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    /// Creates every missing table in declaration order and stamps the version.
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON;", params![])?;
        for table in self.tables {
            table.create(conn)?;
        }
        conn.pragma_update(None, "user_version", BASE_DB_VERSION + self.version)?;
        Ok(())
    }

    /// Drops every table in reverse declaration order, so referencing tables go first.
    pub fn drop_all(&self, conn: &Connection) -> Result<()> {
        for table in self.tables.iter().rev() {
            table.drop(conn)?;
        }
        conn.pragma_update(None, "user_version", 0)?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}

pub const BASE_DB_VERSION: usize = 99999;
