use crate::errors::DbError;
use crate::page::PageId;
use bytes::{Buf, BufMut};
use std::fmt;
use std::io;
use std::sync::Arc;

/// Fixed payload length of string fields, in bytes.
pub const STRING_LEN: usize = 128;

/// The type of a field. Every type has a fixed on-disk length, so tuples of a
/// given schema are fixed-size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int,
    Str,
}

impl FieldType {
    /// On-disk length of a field of this type. Strings carry a 4-byte length
    /// prefix ahead of their NUL-padded payload.
    pub fn byte_len(&self) -> usize {
        match self {
            FieldType::Int => 4,
            FieldType::Str => 4 + STRING_LEN,
        }
    }

    /// Decodes one field of this type from the front of `buf`.
    pub fn parse(&self, buf: &mut impl Buf) -> Result<Field, DbError> {
        if buf.remaining() < self.byte_len() {
            return Err(DbError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated field",
            )));
        }
        match self {
            FieldType::Int => Ok(Field::Int(buf.get_i32())),
            FieldType::Str => {
                let len = buf.get_u32() as usize;
                if len > STRING_LEN {
                    return Err(DbError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "string length prefix out of range",
                    )));
                }
                let mut raw = vec![0u8; STRING_LEN];
                buf.copy_to_slice(&mut raw);
                raw.truncate(len);
                Ok(Field::Str(String::from_utf8_lossy(&raw).into_owned()))
            }
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int => write!(f, "int"),
            FieldType::Str => write!(f, "string"),
        }
    }
}

/// A single typed value. Fields are immutable and totally ordered, so
/// predicates and aggregations can compare them directly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    pub fn field_type(&self) -> FieldType {
        match self {
            Field::Int(_) => FieldType::Int,
            Field::Str(_) => FieldType::Str,
        }
    }

    /// Encodes this field. Integers are big-endian; strings are a big-endian
    /// length prefix plus the payload truncated to and padded out to
    /// [`STRING_LEN`] bytes.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        match self {
            Field::Int(v) => buf.put_i32(*v),
            Field::Str(s) => {
                let raw = s.as_bytes();
                let len = raw.len().min(STRING_LEN);
                buf.put_u32(len as u32);
                buf.put_slice(&raw[..len]);
                buf.put_bytes(0, STRING_LEN - len);
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            Field::Str(s) => write!(f, "{}", s),
        }
    }
}

/// The schema of a tuple: an ordered sequence of field types with optional
/// names. Two descriptors are equal iff their type sequences are equal;
/// names take no part in equality.
#[derive(Debug, Clone)]
pub struct TupleDesc {
    fields: Vec<(FieldType, Option<String>)>,
}

impl TupleDesc {
    pub fn new(types: Vec<FieldType>, names: Vec<Option<String>>) -> Self {
        assert!(!types.is_empty(), "a schema needs at least one field");
        assert_eq!(types.len(), names.len());
        TupleDesc {
            fields: types.into_iter().zip(names).collect(),
        }
    }

    pub fn unnamed(types: Vec<FieldType>) -> Self {
        let names = vec![None; types.len()];
        Self::new(types, names)
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field_type(&self, i: usize) -> FieldType {
        self.fields[i].0
    }

    pub fn field_name(&self, i: usize) -> Option<&str> {
        self.fields[i].1.as_deref()
    }

    /// Index of the first field carrying `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|(_, n)| n.as_deref() == Some(name))
    }

    /// On-disk size of a tuple with this schema.
    pub fn tuple_size(&self) -> usize {
        self.fields.iter().map(|(t, _)| t.byte_len()).sum()
    }
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|((a, _), (b, _))| a == b)
    }
}

impl Eq for TupleDesc {}

impl fmt::Display for TupleDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (ty, name)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}({})", ty, name.as_deref().unwrap_or(""))?;
        }
        Ok(())
    }
}

/// The coordinates of a tuple on disk: which page, which slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pid: PageId,
    slot: usize,
}

impl RecordId {
    pub fn new(pid: PageId, slot: usize) -> Self {
        RecordId { pid, slot }
    }

    pub fn page_id(&self) -> PageId {
        self.pid
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// A single row: a schema, one optional field value per column, and the
/// record id assigned by the page the tuple lives on (if any).
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    desc: Arc<TupleDesc>,
    fields: Vec<Option<Field>>,
    record_id: Option<RecordId>,
}

impl Tuple {
    /// A new tuple with every field unset.
    pub fn new(desc: Arc<TupleDesc>) -> Self {
        let fields = vec![None; desc.num_fields()];
        Tuple {
            desc,
            fields,
            record_id: None,
        }
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn field(&self, i: usize) -> Option<&Field> {
        self.fields[i].as_ref()
    }

    pub fn set_field(&mut self, i: usize, f: Field) {
        self.fields[i] = Some(f);
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.record_id = rid;
    }

    /// Encodes all fields back to back. Unset fields encode as the zero value
    /// of their type.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        for (i, field) in self.fields.iter().enumerate() {
            match field {
                Some(f) => f.serialize(buf),
                None => match self.desc.field_type(i) {
                    FieldType::Int => Field::Int(0).serialize(buf),
                    FieldType::Str => Field::Str(String::new()).serialize(buf),
                },
            }
        }
    }

    /// Decodes one tuple of schema `desc` from the front of `buf`.
    pub fn parse(desc: &Arc<TupleDesc>, buf: &mut impl Buf) -> Result<Tuple, DbError> {
        let mut tuple = Tuple::new(Arc::clone(desc));
        for i in 0..desc.num_fields() {
            let field = desc.field_type(i).parse(buf)?;
            tuple.set_field(i, field);
        }
        Ok(tuple)
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "\t")?;
            }
            match field {
                Some(value) => write!(f, "{}", value)?,
                None => write!(f, "null")?,
            }
        }
        Ok(())
    }
}
