//! The catalog: a process-wide registry of tables, their schemas and their
//! backing heap files, populated once at startup and passed explicitly to
//! the buffer pool and the operators.

use crate::errors::DbError;
use crate::heap_file::HeapFile;
use crate::tuple::{FieldType, TupleDesc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

struct TableEntry {
    file: Arc<HeapFile>,
    name: String,
    primary_key: String,
}

/// Lookup is read-mostly: tables are registered at startup and then only
/// read, so the maps sit behind reader-writer locks.
#[derive(Default)]
pub struct Catalog {
    tables: RwLock<HashMap<u32, TableEntry>>,
    names: RwLock<HashMap<String, u32>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `file` under `name` with the given primary-key field. The
    /// file's id becomes the table id; re-registering a name replaces the
    /// previous binding.
    pub fn add_table(&self, file: Arc<HeapFile>, name: &str, primary_key: &str) {
        let id = file.id();
        self.names.write().insert(name.to_string(), id);
        self.tables.write().insert(
            id,
            TableEntry {
                file,
                name: name.to_string(),
                primary_key: primary_key.to_string(),
            },
        );
    }

    pub fn database_file(&self, table_id: u32) -> Result<Arc<HeapFile>, DbError> {
        self.tables
            .read()
            .get(&table_id)
            .map(|entry| Arc::clone(&entry.file))
            .ok_or_else(|| DbError::TableNotFound(table_id.to_string()))
    }

    pub fn tuple_desc(&self, table_id: u32) -> Result<Arc<TupleDesc>, DbError> {
        Ok(Arc::clone(self.database_file(table_id)?.tuple_desc()))
    }

    pub fn table_name(&self, table_id: u32) -> Result<String, DbError> {
        self.tables
            .read()
            .get(&table_id)
            .map(|entry| entry.name.clone())
            .ok_or_else(|| DbError::TableNotFound(table_id.to_string()))
    }

    pub fn primary_key(&self, table_id: u32) -> Result<String, DbError> {
        self.tables
            .read()
            .get(&table_id)
            .map(|entry| entry.primary_key.clone())
            .ok_or_else(|| DbError::TableNotFound(table_id.to_string()))
    }

    pub fn table_id(&self, name: &str) -> Result<u32, DbError> {
        self.names
            .read()
            .get(name)
            .copied()
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn table_ids(&self) -> Vec<u32> {
        self.tables.read().keys().copied().collect()
    }

    /// Bootstraps the catalog from a text schema file: one table per line,
    /// `name (col:TYPE [pk], ...)` with TYPE `int` or `string`. Blank lines
    /// are skipped. Backing files are created next to the schema file as
    /// `<name>.dat`.
    pub fn load_schema<P: AsRef<Path>>(&self, path: P) -> Result<(), DbError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let base_dir = path.as_ref().parent().unwrap_or_else(|| Path::new("."));

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let open = line
                .find('(')
                .ok_or_else(|| DbError::InvalidSchema(line.to_string()))?;
            let close = line
                .rfind(')')
                .ok_or_else(|| DbError::InvalidSchema(line.to_string()))?;
            let name = line[..open].trim();
            if name.is_empty() || close < open {
                return Err(DbError::InvalidSchema(line.to_string()));
            }

            let mut types = Vec::new();
            let mut names = Vec::new();
            let mut primary_key = String::new();
            for column in line[open + 1..close].split(',') {
                let column = column.trim();
                if column.is_empty() {
                    continue;
                }
                let (column_name, rest) = column
                    .split_once(':')
                    .ok_or_else(|| DbError::InvalidSchema(column.to_string()))?;
                let column_name = column_name.trim();
                let mut parts = rest.split_whitespace();
                let field_type = match parts.next().map(|t| t.to_ascii_lowercase()).as_deref() {
                    Some("int") => FieldType::Int,
                    Some("string") => FieldType::Str,
                    _ => return Err(DbError::InvalidSchema(column.to_string())),
                };
                if parts.next() == Some("pk") {
                    primary_key = column_name.to_string();
                }
                types.push(field_type);
                names.push(Some(column_name.to_string()));
            }
            if types.is_empty() {
                return Err(DbError::InvalidSchema(line.to_string()));
            }

            let desc = Arc::new(TupleDesc::new(types, names));
            let file = Arc::new(HeapFile::open(
                base_dir.join(format!("{}.dat", name)),
                desc,
            )?);
            self.add_table(file, name, &primary_key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn write_schema(dir: &TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("schema.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn load_schema_registers_tables_and_files() {
        let dir = TempDir::new().unwrap();
        let path = write_schema(
            &dir,
            "accounts (id:int pk, balance:int)\n\nnotes (id:int pk, body:string)\n",
        );

        let catalog = Catalog::new();
        catalog.load_schema(&path).unwrap();
        assert_eq!(catalog.table_ids().len(), 2);

        let accounts = catalog.table_id("accounts").unwrap();
        assert_eq!(catalog.table_name(accounts).unwrap(), "accounts");
        assert_eq!(catalog.primary_key(accounts).unwrap(), "id");
        let desc = catalog.tuple_desc(accounts).unwrap();
        assert_eq!(desc.num_fields(), 2);
        assert_eq!(desc.field_type(0), FieldType::Int);
        assert_eq!(desc.field_name(1), Some("balance"));
        assert!(dir.path().join("accounts.dat").exists());

        let notes = catalog.table_id("notes").unwrap();
        let desc = catalog.tuple_desc(notes).unwrap();
        assert_eq!(desc.field_type(1), FieldType::Str);
    }

    #[test]
    fn unknown_lookups_fail() {
        let catalog = Catalog::new();
        assert!(matches!(
            catalog.table_id("missing"),
            Err(DbError::TableNotFound(_))
        ));
        assert!(matches!(
            catalog.database_file(42),
            Err(DbError::TableNotFound(_))
        ));
    }

    #[test]
    fn malformed_schema_lines_are_rejected() {
        let dir = TempDir::new().unwrap();
        for bad in ["accounts", "accounts (id int)", "accounts (id:float)", "t ()"] {
            let path = write_schema(&dir, bad);
            let catalog = Catalog::new();
            assert!(
                matches!(catalog.load_schema(&path), Err(DbError::InvalidSchema(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn re_registering_a_name_replaces_the_binding() {
        let dir = TempDir::new().unwrap();
        let desc = Arc::new(TupleDesc::unnamed(vec![FieldType::Int]));
        let first =
            Arc::new(HeapFile::open(dir.path().join("a.dat"), Arc::clone(&desc)).unwrap());
        let second = Arc::new(HeapFile::open(dir.path().join("b.dat"), desc).unwrap());

        let catalog = Catalog::new();
        catalog.add_table(first, "t", "x");
        catalog.add_table(Arc::clone(&second), "t", "x");
        assert_eq!(catalog.table_id("t").unwrap(), second.id());
    }
}
