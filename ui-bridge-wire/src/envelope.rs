use crate::binary::{BinaryReader, BinaryWriter, WireError};
use crate::types::{DataChunk, LogicalType, TokenKind, Value, Vector};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmptyResult;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorResult {
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnNamesAndTypes {
    pub names: Vec<String>,
    pub types: Vec<LogicalType>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SuccessResult {
    pub column_names_and_types: ColumnNamesAndTypes,
    pub chunks: Vec<DataChunk>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenizeResult {
    pub offsets: Vec<u64>,
    pub types: Vec<TokenKind>,
}

/// What `/ddb/run` answers with.
#[derive(Clone, Debug, PartialEq)]
pub enum RunResult {
    Success(SuccessResult),
    Error(ErrorResult),
}

pub fn encode_empty_result() -> Vec<u8> {
    let mut writer = BinaryWriter::new();
    writer.end_object();
    writer.finish()
}

pub fn encode_error_result(error: &str) -> Vec<u8> {
    let mut writer = BinaryWriter::new();
    writer.field(100).write_bool(false);
    writer.field(101).write_string(error);
    writer.end_object();
    writer.finish()
}

pub fn encode_success_result(result: &SuccessResult) -> Result<Vec<u8>, WireError> {
    let names = &result.column_names_and_types.names;
    let types = &result.column_names_and_types.types;
    if names.len() != types.len() {
        return Err(WireError::LengthMismatch {
            field: "column types",
            expected: names.len(),
            found: types.len(),
        });
    }

    let mut writer = BinaryWriter::new();
    writer.field(100).write_bool(true);

    writer.field(101);
    writer.field(100).write_list_len(names.len());
    for name in names {
        writer.write_string(name);
    }
    writer.field(101).write_list_len(types.len());
    for ty in types {
        write_logical_type(&mut writer, ty);
    }
    writer.end_object();

    writer.field(102).write_list_len(result.chunks.len());
    for chunk in &result.chunks {
        write_chunk(&mut writer, chunk, types)?;
    }
    writer.end_object();
    Ok(writer.finish())
}

pub fn encode_tokenize_result(result: &TokenizeResult) -> Vec<u8> {
    let mut writer = BinaryWriter::new();
    writer.field(100).write_list_len(result.offsets.len());
    for offset in &result.offsets {
        writer.write_varint(*offset);
    }
    writer.field(101).write_list_len(result.types.len());
    for kind in &result.types {
        writer.write_varint(u64::from(kind.code()));
    }
    writer.end_object();
    writer.finish()
}

pub fn decode_empty_result(bytes: &[u8]) -> Result<EmptyResult, WireError> {
    let mut reader = BinaryReader::new(bytes);
    reader.expect_end_object()?;
    reader.expect_eof()?;
    Ok(EmptyResult)
}

pub fn decode_run_result(bytes: &[u8]) -> Result<RunResult, WireError> {
    let mut reader = BinaryReader::new(bytes);
    reader.expect_field(100)?;
    let success = reader.read_bool()?;
    if !success {
        reader.expect_field(101)?;
        let error = reader.read_string()?;
        reader.expect_end_object()?;
        reader.expect_eof()?;
        return Ok(RunResult::Error(ErrorResult { error }));
    }

    reader.expect_field(101)?;
    reader.expect_field(100)?;
    let name_count = reader.read_list_len()?;
    let mut names = Vec::with_capacity(name_count);
    for _ in 0..name_count {
        names.push(reader.read_string()?);
    }
    reader.expect_field(101)?;
    let type_count = reader.read_list_len()?;
    let mut types = Vec::with_capacity(type_count);
    for _ in 0..type_count {
        types.push(read_logical_type(&mut reader)?);
    }
    reader.expect_end_object()?;
    if names.len() != types.len() {
        return Err(WireError::LengthMismatch {
            field: "column types",
            expected: names.len(),
            found: types.len(),
        });
    }

    reader.expect_field(102)?;
    let chunk_count = reader.read_list_len()?;
    let mut chunks = Vec::with_capacity(chunk_count);
    for _ in 0..chunk_count {
        chunks.push(read_chunk(&mut reader, &types)?);
    }
    reader.expect_end_object()?;
    reader.expect_eof()?;

    Ok(RunResult::Success(SuccessResult {
        column_names_and_types: ColumnNamesAndTypes { names, types },
        chunks,
    }))
}

pub fn decode_tokenize_result(bytes: &[u8]) -> Result<TokenizeResult, WireError> {
    let mut reader = BinaryReader::new(bytes);
    reader.expect_field(100)?;
    let offset_count = reader.read_list_len()?;
    let mut offsets = Vec::with_capacity(offset_count);
    for _ in 0..offset_count {
        offsets.push(reader.read_varint()?);
    }
    reader.expect_field(101)?;
    let type_count = reader.read_list_len()?;
    let mut types = Vec::with_capacity(type_count);
    for _ in 0..type_count {
        let code = reader.read_varint()?;
        let code = u8::try_from(code).map_err(|_| WireError::InvalidTokenKind(u8::MAX))?;
        types.push(TokenKind::from_code(code).ok_or(WireError::InvalidTokenKind(code))?);
    }
    reader.expect_end_object()?;
    reader.expect_eof()?;
    if offsets.len() != types.len() {
        return Err(WireError::LengthMismatch {
            field: "token types",
            expected: offsets.len(),
            found: types.len(),
        });
    }
    Ok(TokenizeResult { offsets, types })
}

fn write_logical_type(writer: &mut BinaryWriter, ty: &LogicalType) {
    writer.field(100).write_varint(u64::from(ty.id()));
    match ty {
        LogicalType::Decimal { width, scale } => {
            writer.field(101);
            writer.field(200).write_varint(u64::from(*width));
            writer.field(201).write_varint(u64::from(*scale));
            writer.end_object();
        }
        LogicalType::List(child) => {
            writer.field(101);
            writer.field(200);
            write_logical_type(writer, child);
            writer.end_object();
        }
        LogicalType::Struct(fields) => {
            writer.field(101);
            writer.field(200).write_list_len(fields.len());
            for (name, child) in fields {
                writer.field(0).write_string(name);
                writer.field(1);
                write_logical_type(writer, child);
                writer.end_object();
            }
            writer.end_object();
        }
        _ => {}
    }
    writer.end_object();
}

fn read_logical_type(reader: &mut BinaryReader<'_>) -> Result<LogicalType, WireError> {
    reader.expect_field(100)?;
    let id = reader.read_varint()?;
    let id = u8::try_from(id).map_err(|_| WireError::InvalidTypeId(u8::MAX))?;
    let ty = match id {
        1 => LogicalType::Null,
        10 => LogicalType::Boolean,
        11 => LogicalType::TinyInt,
        12 => LogicalType::SmallInt,
        13 => LogicalType::Integer,
        14 => LogicalType::BigInt,
        15 => LogicalType::Date,
        16 => LogicalType::Time,
        19 => LogicalType::Timestamp,
        21 => {
            reader.expect_field(101)?;
            reader.expect_field(200)?;
            let width = read_small(reader, id)?;
            reader.expect_field(201)?;
            let scale = read_small(reader, id)?;
            reader.expect_end_object()?;
            LogicalType::Decimal { width, scale }
        }
        22 => LogicalType::Float,
        23 => LogicalType::Double,
        25 => LogicalType::Varchar,
        26 => LogicalType::Blob,
        28 => LogicalType::UTinyInt,
        29 => LogicalType::USmallInt,
        30 => LogicalType::UInteger,
        31 => LogicalType::UBigInt,
        50 => LogicalType::HugeInt,
        100 => {
            reader.expect_field(101)?;
            reader.expect_field(200)?;
            let count = reader.read_list_len()?;
            let mut fields = Vec::with_capacity(count);
            for _ in 0..count {
                reader.expect_field(0)?;
                let name = reader.read_string()?;
                reader.expect_field(1)?;
                let child = read_logical_type(reader)?;
                reader.expect_end_object()?;
                fields.push((name, child));
            }
            reader.expect_end_object()?;
            LogicalType::Struct(fields)
        }
        101 => {
            reader.expect_field(101)?;
            reader.expect_field(200)?;
            let child = read_logical_type(reader)?;
            reader.expect_end_object()?;
            LogicalType::List(Box::new(child))
        }
        other => return Err(WireError::InvalidTypeId(other)),
    };
    reader.expect_end_object()?;
    Ok(ty)
}

fn read_small(reader: &mut BinaryReader<'_>, id: u8) -> Result<u8, WireError> {
    let value = reader.read_varint()?;
    u8::try_from(value).map_err(|_| WireError::InvalidTypeId(id))
}

fn write_chunk(
    writer: &mut BinaryWriter,
    chunk: &DataChunk,
    types: &[LogicalType],
) -> Result<(), WireError> {
    if chunk.row_count > usize::from(u16::MAX) {
        return Err(WireError::LengthTooLarge("chunk rows", chunk.row_count));
    }
    if chunk.columns.len() != types.len() {
        return Err(WireError::LengthMismatch {
            field: "chunk columns",
            expected: types.len(),
            found: chunk.columns.len(),
        });
    }

    writer.field(100).write_varint(chunk.row_count as u64);
    writer.field(101).write_list_len(chunk.columns.len());
    for (column, ty) in chunk.columns.iter().zip(types) {
        if column.values.len() != chunk.row_count {
            return Err(WireError::LengthMismatch {
                field: "column values",
                expected: chunk.row_count,
                found: column.values.len(),
            });
        }
        write_vector(writer, ty, &column.values)?;
    }
    writer.end_object();
    Ok(())
}

fn read_chunk(reader: &mut BinaryReader<'_>, types: &[LogicalType]) -> Result<DataChunk, WireError> {
    reader.expect_field(100)?;
    let row_count = reader.read_varint()?;
    let row_count =
        usize::try_from(row_count).map_err(|_| WireError::LengthTooLarge("chunk rows", usize::MAX))?;
    if row_count > usize::from(u16::MAX) {
        return Err(WireError::LengthTooLarge("chunk rows", row_count));
    }
    reader.expect_field(101)?;
    let column_count = reader.read_list_len()?;
    if column_count != types.len() {
        return Err(WireError::LengthMismatch {
            field: "chunk columns",
            expected: types.len(),
            found: column_count,
        });
    }
    let mut columns = Vec::with_capacity(column_count);
    for ty in types {
        let values = read_vector(reader, ty, row_count)?;
        columns.push(Vector::new(ty.clone(), values));
    }
    reader.expect_end_object()?;
    Ok(DataChunk { row_count, columns })
}

fn write_vector(
    writer: &mut BinaryWriter,
    ty: &LogicalType,
    values: &[Value],
) -> Result<(), WireError> {
    let all_valid = values.iter().all(|value| !value.is_null());
    writer.field(100).write_bool(all_valid);
    if !all_valid {
        let mut mask = vec![0u8; values.len().div_ceil(8)];
        for (index, value) in values.iter().enumerate() {
            if !value.is_null() {
                mask[index / 8] |= 1 << (index % 8);
            }
        }
        writer.field(101).write_bytes(&mask);
    }

    if let Some(width) = ty.fixed_width() {
        let mut data = Vec::with_capacity(values.len() * width);
        for value in values {
            encode_fixed(ty, width, value, &mut data)?;
        }
        writer.field(102).write_bytes(&data);
    } else {
        match ty {
            LogicalType::Null => {
                if let Some(value) = values.iter().find(|value| !value.is_null()) {
                    return Err(mismatch(ty, value));
                }
            }
            LogicalType::Varchar => {
                writer.field(102).write_list_len(values.len());
                for value in values {
                    match value {
                        Value::Text(text) => writer.write_string(text),
                        Value::Null => writer.write_string(""),
                        other => return Err(mismatch(ty, other)),
                    };
                }
            }
            LogicalType::Blob => {
                writer.field(102).write_list_len(values.len());
                for value in values {
                    match value {
                        Value::Blob(bytes) => writer.write_bytes(bytes),
                        Value::Null => writer.write_bytes(&[]),
                        other => return Err(mismatch(ty, other)),
                    };
                }
            }
            LogicalType::Struct(fields) => {
                writer.field(103).write_list_len(fields.len());
                for (field_index, (_, child_ty)) in fields.iter().enumerate() {
                    let mut child_values = Vec::with_capacity(values.len());
                    for value in values {
                        match value {
                            Value::Struct(members) if members.len() == fields.len() => {
                                child_values.push(members[field_index].clone());
                            }
                            Value::Null => child_values.push(Value::Null),
                            other => return Err(mismatch(ty, other)),
                        }
                    }
                    write_vector(writer, child_ty, &child_values)?;
                }
            }
            LogicalType::List(child_ty) => {
                let mut entries = Vec::with_capacity(values.len());
                let mut child_values = Vec::new();
                for value in values {
                    match value {
                        Value::List(items) => {
                            entries.push((child_values.len(), items.len()));
                            child_values.extend(items.iter().cloned());
                        }
                        Value::Null => entries.push((child_values.len(), 0)),
                        other => return Err(mismatch(ty, other)),
                    }
                }
                writer.field(104).write_varint(child_values.len() as u64);
                writer.field(105).write_list_len(entries.len());
                for (offset, length) in entries {
                    writer.field(100).write_varint(offset as u64);
                    writer.field(101).write_varint(length as u64);
                    writer.end_object();
                }
                writer.field(106);
                write_vector(writer, child_ty, &child_values)?;
            }
            _ => unreachable!("fixed-width types are handled above"),
        }
    }
    writer.end_object();
    Ok(())
}

fn read_vector(
    reader: &mut BinaryReader<'_>,
    ty: &LogicalType,
    count: usize,
) -> Result<Vec<Value>, WireError> {
    reader.expect_field(100)?;
    let all_valid = reader.read_bool()?;
    let mask = if all_valid {
        None
    } else {
        reader.expect_field(101)?;
        let mask = reader.read_bytes()?;
        if mask.len() != count.div_ceil(8) {
            return Err(WireError::LengthMismatch {
                field: "validity mask",
                expected: count.div_ceil(8),
                found: mask.len(),
            });
        }
        Some(mask.to_vec())
    };
    let is_valid = |index: usize| match &mask {
        Some(mask) => mask[index / 8] & (1 << (index % 8)) != 0,
        None => true,
    };

    // counts come off the wire, so never pre-allocate more than a standard chunk
    let mut values = Vec::with_capacity(count.min(2048));
    if let Some(width) = ty.fixed_width() {
        reader.expect_field(102)?;
        let data = reader.read_bytes()?;
        let expected = count
            .checked_mul(width)
            .ok_or(WireError::LengthTooLarge("vector data", count))?;
        if data.len() != expected {
            return Err(WireError::LengthMismatch {
                field: "vector data",
                expected,
                found: data.len(),
            });
        }
        for (index, slot) in data.chunks_exact(width).enumerate() {
            if is_valid(index) {
                values.push(decode_fixed(ty, slot)?);
            } else {
                values.push(Value::Null);
            }
        }
    } else {
        match ty {
            LogicalType::Null => values.resize(count, Value::Null),
            LogicalType::Varchar | LogicalType::Blob => {
                reader.expect_field(102)?;
                let len = reader.read_list_len()?;
                if len != count {
                    return Err(WireError::LengthMismatch {
                        field: "vector data",
                        expected: count,
                        found: len,
                    });
                }
                for index in 0..count {
                    let bytes = reader.read_bytes()?;
                    if !is_valid(index) {
                        values.push(Value::Null);
                    } else if matches!(ty, LogicalType::Varchar) {
                        let text =
                            String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)?;
                        values.push(Value::Text(text));
                    } else {
                        values.push(Value::Blob(bytes.to_vec()));
                    }
                }
            }
            LogicalType::Struct(fields) => {
                reader.expect_field(103)?;
                let len = reader.read_list_len()?;
                if len != fields.len() {
                    return Err(WireError::LengthMismatch {
                        field: "struct children",
                        expected: fields.len(),
                        found: len,
                    });
                }
                let mut children = Vec::with_capacity(fields.len());
                for (_, child_ty) in fields {
                    children.push(read_vector(reader, child_ty, count)?);
                }
                for index in 0..count {
                    if is_valid(index) {
                        let members = children.iter().map(|child| child[index].clone()).collect();
                        values.push(Value::Struct(members));
                    } else {
                        values.push(Value::Null);
                    }
                }
            }
            LogicalType::List(child_ty) => {
                reader.expect_field(104)?;
                let list_size = reader.read_varint()? as usize;
                reader.expect_field(105)?;
                let len = reader.read_list_len()?;
                if len != count {
                    return Err(WireError::LengthMismatch {
                        field: "list entries",
                        expected: count,
                        found: len,
                    });
                }
                let mut entries = Vec::with_capacity(count.min(2048));
                for _ in 0..count {
                    reader.expect_field(100)?;
                    let offset = reader.read_varint()? as usize;
                    reader.expect_field(101)?;
                    let length = reader.read_varint()? as usize;
                    reader.expect_end_object()?;
                    entries.push((offset, length));
                }
                reader.expect_field(106)?;
                let child_values = read_vector(reader, child_ty, list_size)?;
                for (index, (offset, length)) in entries.into_iter().enumerate() {
                    let end = offset
                        .checked_add(length)
                        .filter(|end| *end <= child_values.len())
                        .ok_or(WireError::LengthMismatch {
                            field: "list child",
                            expected: offset.saturating_add(length),
                            found: child_values.len(),
                        })?;
                    if is_valid(index) {
                        values.push(Value::List(child_values[offset..end].to_vec()));
                    } else {
                        values.push(Value::Null);
                    }
                }
            }
            _ => unreachable!("fixed-width types are handled above"),
        }
    }
    reader.expect_end_object()?;
    Ok(values)
}

fn encode_fixed(
    ty: &LogicalType,
    width: usize,
    value: &Value,
    out: &mut Vec<u8>,
) -> Result<(), WireError> {
    let out_of_range = || WireError::ValueOutOfRange {
        logical_type: ty.name(),
    };
    match (ty, value) {
        (_, Value::Null) => out.resize(out.len() + width, 0),
        (LogicalType::Boolean, Value::Boolean(flag)) => out.push(u8::from(*flag)),
        (LogicalType::TinyInt, Value::Int(v)) => {
            out.extend_from_slice(&i8::try_from(*v).map_err(|_| out_of_range())?.to_le_bytes())
        }
        (LogicalType::SmallInt, Value::Int(v)) => {
            out.extend_from_slice(&i16::try_from(*v).map_err(|_| out_of_range())?.to_le_bytes())
        }
        (LogicalType::Integer | LogicalType::Date, Value::Int(v)) => {
            out.extend_from_slice(&i32::try_from(*v).map_err(|_| out_of_range())?.to_le_bytes())
        }
        (LogicalType::BigInt | LogicalType::Time | LogicalType::Timestamp, Value::Int(v)) => {
            out.extend_from_slice(&v.to_le_bytes())
        }
        (LogicalType::UTinyInt, Value::UInt(v)) => {
            out.extend_from_slice(&u8::try_from(*v).map_err(|_| out_of_range())?.to_le_bytes())
        }
        (LogicalType::USmallInt, Value::UInt(v)) => {
            out.extend_from_slice(&u16::try_from(*v).map_err(|_| out_of_range())?.to_le_bytes())
        }
        (LogicalType::UInteger, Value::UInt(v)) => {
            out.extend_from_slice(&u32::try_from(*v).map_err(|_| out_of_range())?.to_le_bytes())
        }
        (LogicalType::UBigInt, Value::UInt(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (LogicalType::Float, Value::Float(v)) => out.extend_from_slice(&(*v as f32).to_le_bytes()),
        (LogicalType::Double, Value::Float(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (LogicalType::HugeInt, Value::HugeInt(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (LogicalType::HugeInt, Value::Int(v)) => out.extend_from_slice(&i128::from(*v).to_le_bytes()),
        (LogicalType::Decimal { .. }, Value::Int(v)) => match width {
            2 => out.extend_from_slice(&i16::try_from(*v).map_err(|_| out_of_range())?.to_le_bytes()),
            4 => out.extend_from_slice(&i32::try_from(*v).map_err(|_| out_of_range())?.to_le_bytes()),
            8 => out.extend_from_slice(&v.to_le_bytes()),
            _ => out.extend_from_slice(&i128::from(*v).to_le_bytes()),
        },
        (LogicalType::Decimal { .. }, Value::HugeInt(v)) if width == 16 => {
            out.extend_from_slice(&v.to_le_bytes())
        }
        (_, other) => return Err(mismatch(ty, other)),
    }
    Ok(())
}

fn decode_fixed(ty: &LogicalType, slot: &[u8]) -> Result<Value, WireError> {
    let value = match ty {
        LogicalType::Boolean => match slot[0] {
            0 => Value::Boolean(false),
            1 => Value::Boolean(true),
            other => return Err(WireError::InvalidBool(other)),
        },
        LogicalType::TinyInt => Value::Int(i64::from(i8::from_le_bytes([slot[0]]))),
        LogicalType::SmallInt => Value::Int(i64::from(i16::from_le_bytes(array(slot)))),
        LogicalType::Integer | LogicalType::Date => {
            Value::Int(i64::from(i32::from_le_bytes(array(slot))))
        }
        LogicalType::BigInt | LogicalType::Time | LogicalType::Timestamp => {
            Value::Int(i64::from_le_bytes(array(slot)))
        }
        LogicalType::UTinyInt => Value::UInt(u64::from(slot[0])),
        LogicalType::USmallInt => Value::UInt(u64::from(u16::from_le_bytes(array(slot)))),
        LogicalType::UInteger => Value::UInt(u64::from(u32::from_le_bytes(array(slot)))),
        LogicalType::UBigInt => Value::UInt(u64::from_le_bytes(array(slot))),
        LogicalType::Float => Value::Float(f64::from(f32::from_le_bytes(array(slot)))),
        LogicalType::Double => Value::Float(f64::from_le_bytes(array(slot))),
        LogicalType::HugeInt => Value::HugeInt(i128::from_le_bytes(array(slot))),
        LogicalType::Decimal { .. } => match slot.len() {
            2 => Value::Int(i64::from(i16::from_le_bytes(array(slot)))),
            4 => Value::Int(i64::from(i32::from_le_bytes(array(slot)))),
            8 => Value::Int(i64::from_le_bytes(array(slot))),
            _ => Value::HugeInt(i128::from_le_bytes(array(slot))),
        },
        other => return Err(WireError::InvalidTypeId(other.id())),
    };
    Ok(value)
}

fn array<const N: usize>(slot: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&slot[..N]);
    out
}

fn mismatch(ty: &LogicalType, value: &Value) -> WireError {
    WireError::ValueTypeMismatch {
        logical_type: ty.name(),
        value: value.kind(),
    }
}
