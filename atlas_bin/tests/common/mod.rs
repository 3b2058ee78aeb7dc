use basalt::buffer_pool::BufferPool;
use basalt::catalog::Catalog;
use basalt::transaction::TransactionId;
use basalt::tuple::{Field, Tuple, TupleDesc};
use std::sync::Arc;
use tempfile::TempDir;

/// Writes `schema` to a temp dir, bootstraps a catalog from it and wraps a
/// buffer pool of `pool_pages` pages around it. The `TempDir` keeps the
/// backing files alive for the duration of the test.
pub fn setup_database(schema: &str, pool_pages: usize) -> (TempDir, Arc<Catalog>, Arc<BufferPool>) {
    let dir = TempDir::new().unwrap();
    let schema_path = dir.path().join("schema.txt");
    std::fs::write(&schema_path, schema).unwrap();

    let catalog = Arc::new(Catalog::new());
    catalog.load_schema(&schema_path).unwrap();
    let pool = Arc::new(BufferPool::new(pool_pages, Arc::clone(&catalog)));
    (dir, catalog, pool)
}

pub fn int_tuple(desc: &Arc<TupleDesc>, values: &[i32]) -> Tuple {
    let mut tuple = Tuple::new(Arc::clone(desc));
    for (i, v) in values.iter().enumerate() {
        tuple.set_field(i, Field::Int(*v));
    }
    tuple
}

/// Scans `table_id` under a fresh transaction and returns the int rows,
/// committing the scan before returning.
pub fn scan_int_rows(pool: &BufferPool, catalog: &Catalog, table_id: u32) -> Vec<Vec<i32>> {
    use basalt::heap_file::DbFileIterator;

    let tid = TransactionId::new();
    let file = catalog.database_file(table_id).unwrap();
    let mut iter = file.iterator(tid, pool);
    iter.open().unwrap();

    let mut rows = Vec::new();
    while let Some(tuple) = iter.next().unwrap() {
        let row = (0..tuple.tuple_desc().num_fields())
            .map(|i| match tuple.field(i) {
                Some(Field::Int(v)) => *v,
                other => panic!("expected an int field, got {:?}", other),
            })
            .collect();
        rows.push(row);
    }
    iter.close();
    pool.transaction_complete(tid, true).unwrap();
    rows
}
