use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};

#[derive(Debug, Clone)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl CellValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
        }
    }

    pub fn rounded(&self) -> Self {
        match self {
            Self::Real(value) => Self::Real(format!("{value:.2}").parse().unwrap_or(*value)),
            other => other.clone(),
        }
    }

    fn from_sql(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(value) => Self::Integer(value),
            ValueRef::Real(value) => Self::Real(value),
            ValueRef::Text(bytes) => Self::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Self::Blob(bytes.to_vec()),
        }
    }
}

impl PartialEq for CellValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(left), Self::Integer(right)) => left == right,
            (Self::Real(left), Self::Real(right)) => left == right,
            (Self::Integer(left), Self::Real(right)) | (Self::Real(right), Self::Integer(left)) => {
                *left as f64 == *right
            }
            (Self::Text(left), Self::Text(right)) => left == right,
            (Self::Blob(left), Self::Blob(right)) => left == right,
            _ => false,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value:?}"),
            Self::Text(value) => write!(f, "'{value}'"),
            Self::Blob(value) => write!(f, "<blob {} bytes>", value.len()),
        }
    }
}

pub type ResultRow = BTreeMap<String, CellValue>;

pub fn format_rows(rows: &[ResultRow]) -> String {
    let rendered = rows
        .iter()
        .map(|row| {
            let fields = row
                .iter()
                .map(|(column, value)| format!("{column}: {value}"))
                .collect::<Vec<String>>()
                .join(", ");
            format!("{{{fields}}}")
        })
        .collect::<Vec<String>>()
        .join(", ");
    format!("[{rendered}]")
}

pub struct ReferenceStore {
    connection: Connection,
}

impl ReferenceStore {
    pub fn open_read_only(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            bail!("reference database does not exist: {}", db_path.display());
        }

        let connection = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open database read-only: {}", db_path.display()))?;

        Ok(Self { connection })
    }

    pub fn execute(&self, sql: &str) -> rusqlite::Result<Vec<ResultRow>> {
        let mut statement = self.connection.prepare(sql)?;
        let columns = statement
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<String>>();

        let mut rows = statement.query([])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = ResultRow::new();
            for (index, column) in columns.iter().enumerate() {
                record.insert(column.clone(), CellValue::from_sql(row.get_ref(index)?));
            }
            results.push(record);
        }

        Ok(results)
    }

    pub fn close(self) -> Result<()> {
        self.connection
            .close()
            .map_err(|(_, err)| err)
            .context("failed to close reference database")
    }
}
