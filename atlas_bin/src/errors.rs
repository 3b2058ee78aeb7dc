use basalt::errors::DbError;

#[derive(Debug)]
pub enum ExecutionError {
    Db(DbError),
    TableNotFound(String),
    ColumnNotFound(String),
    GenericError(String),
    /// The transaction lost a deadlock; the caller must abort it through
    /// `BufferPool::transaction_complete(tid, false)`.
    Aborted,
}

impl From<DbError> for ExecutionError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Aborted => ExecutionError::Aborted,
            DbError::TableNotFound(name) => ExecutionError::TableNotFound(name),
            other => ExecutionError::Db(other),
        }
    }
}

impl From<std::io::Error> for ExecutionError {
    fn from(err: std::io::Error) -> Self {
        ExecutionError::Db(DbError::Io(err))
    }
}
