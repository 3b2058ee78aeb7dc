//! The main entry point: loads a schema file and prints a sequential scan of
//! one table.

use atlas_bin::errors::ExecutionError;
use atlas_bin::executor::{Executor, SeqScan};
use basalt::buffer_pool::{BufferPool, DEFAULT_PAGES};
use basalt::catalog::Catalog;
use basalt::transaction::TransactionId;
use std::sync::Arc;

fn main() {
    let mut args = std::env::args().skip(1);
    let (Some(schema_path), Some(table)) = (args.next(), args.next()) else {
        eprintln!("usage: atlas_bin <schema-file> <table>");
        std::process::exit(2);
    };

    if let Err(err) = run(&schema_path, &table) {
        eprintln!("error: {:?}", err);
        std::process::exit(1);
    }
}

fn run(schema_path: &str, table: &str) -> Result<(), ExecutionError> {
    let catalog = Arc::new(Catalog::new());
    catalog.load_schema(schema_path)?;
    let pool = BufferPool::new(DEFAULT_PAGES, Arc::clone(&catalog));

    let table_id = catalog.table_id(table)?;
    let tid = TransactionId::new();
    let mut scan = SeqScan::new(&pool, tid, table_id, table)?;
    scan.open()?;
    while let Some(tuple) = scan.next()? {
        println!("{}", tuple);
    }
    scan.close();
    pool.transaction_complete(tid, true)?;
    Ok(())
}
