use std::sync::Arc;

use crate::RecordId;

/// Default payload capacity for string columns.
pub const DEFAULT_STR_LEN: usize = 128;

/// The type of a single column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int,
    /// A bounded string; stored as a 4-byte length followed by a payload of
    /// exactly this many bytes.
    Str(usize),
}

impl FieldType {
    /// On-disk size of a field of this type.
    pub fn byte_len(&self) -> usize {
        match self {
            FieldType::Int => 4,
            FieldType::Str(max_len) => 4 + max_len,
        }
    }
}

/// Comparison operators usable in predicates and selectivity estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

/// A single column value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    /// Compares `self op other`. Fields of different kinds never compare
    /// true; `Like` is substring containment and applies to strings only.
    pub fn compare(&self, op: Op, other: &Field) -> bool {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => match op {
                Op::Eq => a == b,
                Op::Ne => a != b,
                Op::Lt => a < b,
                Op::Le => a <= b,
                Op::Gt => a > b,
                Op::Ge => a >= b,
                Op::Like => false,
            },
            (Field::Str(a), Field::Str(b)) => match op {
                Op::Eq => a == b,
                Op::Ne => a != b,
                Op::Lt => a < b,
                Op::Le => a <= b,
                Op::Gt => a > b,
                Op::Ge => a >= b,
                Op::Like => a.contains(b.as_str()),
            },
            _ => false,
        }
    }
}

/// Writes `field` at the start of `out`, which must be `ftype.byte_len()`
/// bytes. Integers are big-endian; strings are a big-endian length followed
/// by the payload, zero-padded to the column capacity.
pub(crate) fn write_field(field: &Field, ftype: FieldType, out: &mut [u8]) {
    out.fill(0);
    match (field, ftype) {
        (Field::Int(v), FieldType::Int) => {
            out[..4].copy_from_slice(&v.to_be_bytes());
        }
        (Field::Str(s), FieldType::Str(max_len)) => {
            let bytes = s.as_bytes();
            let len = bytes.len().min(max_len);
            out[..4].copy_from_slice(&(len as u32).to_be_bytes());
            out[4..4 + len].copy_from_slice(&bytes[..len]);
        }
        // Mismatches are rejected by the schema check before any write.
        _ => {}
    }
}

/// Reads a field of `ftype` from the start of `buf`.
pub(crate) fn read_field(ftype: FieldType, buf: &[u8]) -> Field {
    match ftype {
        FieldType::Int => {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&buf[..4]);
            Field::Int(i32::from_be_bytes(bytes))
        }
        FieldType::Str(max_len) => {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&buf[..4]);
            let len = (u32::from_be_bytes(bytes) as usize).min(max_len);
            Field::Str(String::from_utf8_lossy(&buf[4..4 + len]).into_owned())
        }
    }
}

#[derive(Debug, Clone)]
struct Column {
    ftype: FieldType,
    name: Option<String>,
}

/// The schema of a tuple: an ordered sequence of column types with optional
/// names. Two schemas are equal when their types are equal; names are
/// cosmetic.
#[derive(Debug, Clone)]
pub struct TupleDesc {
    columns: Vec<Column>,
}

impl TupleDesc {
    pub fn new(columns: Vec<(FieldType, Option<String>)>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .map(|(ftype, name)| Column { ftype, name })
                .collect(),
        }
    }

    pub fn unnamed(types: Vec<FieldType>) -> Self {
        Self::new(types.into_iter().map(|t| (t, None)).collect())
    }

    pub fn num_fields(&self) -> usize {
        self.columns.len()
    }

    pub fn field_type(&self, i: usize) -> FieldType {
        self.columns[i].ftype
    }

    pub fn field_name(&self, i: usize) -> Option<&str> {
        self.columns[i].name.as_deref()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.as_deref() == Some(name))
    }

    /// Total on-disk size of one tuple of this schema.
    pub fn tuple_size(&self) -> usize {
        self.columns.iter().map(|c| c.ftype.byte_len()).sum()
    }

    /// Concatenates two schemas.
    pub fn merge(a: &TupleDesc, b: &TupleDesc) -> TupleDesc {
        let mut columns = a.columns.clone();
        columns.extend(b.columns.iter().cloned());
        TupleDesc { columns }
    }
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|(a, b)| a.ftype == b.ftype)
    }
}

impl Eq for TupleDesc {}

/// A row: a schema, one field per column, and the physical location it was
/// read from (if any). Fields are mutable; the schema is not.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    desc: Arc<TupleDesc>,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: Arc<TupleDesc>, fields: Vec<Field>) -> Self {
        debug_assert_eq!(desc.num_fields(), fields.len());
        Self {
            desc,
            fields,
            record_id: None,
        }
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn field(&self, i: usize) -> &Field {
        &self.fields[i]
    }

    pub fn set_field(&mut self, i: usize, field: Field) {
        self.fields[i] = field;
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.record_id = rid;
    }

    /// Writes the tuple into `out`, which must be `desc.tuple_size()` bytes.
    pub(crate) fn write_to(&self, out: &mut [u8]) {
        let mut offset = 0;
        for (i, field) in self.fields.iter().enumerate() {
            let ftype = self.desc.field_type(i);
            write_field(field, ftype, &mut out[offset..offset + ftype.byte_len()]);
            offset += ftype.byte_len();
        }
    }

    /// Reads a tuple of schema `desc` from the start of `buf`.
    pub(crate) fn read_from(desc: &Arc<TupleDesc>, buf: &[u8]) -> Tuple {
        let mut fields = Vec::with_capacity(desc.num_fields());
        let mut offset = 0;
        for i in 0..desc.num_fields() {
            let ftype = desc.field_type(i);
            fields.push(read_field(ftype, &buf[offset..offset + ftype.byte_len()]));
            offset += ftype.byte_len();
        }
        Tuple::new(desc.clone(), fields)
    }
}
