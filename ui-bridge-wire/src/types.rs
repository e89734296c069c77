/// Column type as carried in a success envelope. Ids follow the engine's logical type ids
/// so the browser can decode column data without a separate schema exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogicalType {
    Null,
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Date,
    Time,
    Timestamp,
    Decimal { width: u8, scale: u8 },
    Float,
    Double,
    Varchar,
    Blob,
    UTinyInt,
    USmallInt,
    UInteger,
    UBigInt,
    HugeInt,
    Struct(Vec<(String, LogicalType)>),
    List(Box<LogicalType>),
}

impl LogicalType {
    pub fn id(&self) -> u8 {
        match self {
            LogicalType::Null => 1,
            LogicalType::Boolean => 10,
            LogicalType::TinyInt => 11,
            LogicalType::SmallInt => 12,
            LogicalType::Integer => 13,
            LogicalType::BigInt => 14,
            LogicalType::Date => 15,
            LogicalType::Time => 16,
            LogicalType::Timestamp => 19,
            LogicalType::Decimal { .. } => 21,
            LogicalType::Float => 22,
            LogicalType::Double => 23,
            LogicalType::Varchar => 25,
            LogicalType::Blob => 26,
            LogicalType::UTinyInt => 28,
            LogicalType::USmallInt => 29,
            LogicalType::UInteger => 30,
            LogicalType::UBigInt => 31,
            LogicalType::HugeInt => 50,
            LogicalType::Struct(_) => 100,
            LogicalType::List(_) => 101,
        }
    }

    /// Byte width of one slot for types stored as a flat little-endian array.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            LogicalType::Boolean | LogicalType::TinyInt | LogicalType::UTinyInt => Some(1),
            LogicalType::SmallInt | LogicalType::USmallInt => Some(2),
            LogicalType::Integer | LogicalType::UInteger | LogicalType::Date => Some(4),
            LogicalType::Float => Some(4),
            LogicalType::BigInt
            | LogicalType::UBigInt
            | LogicalType::Time
            | LogicalType::Timestamp
            | LogicalType::Double => Some(8),
            LogicalType::HugeInt => Some(16),
            LogicalType::Decimal { width, .. } => Some(match width {
                0..=4 => 2,
                5..=9 => 4,
                10..=18 => 8,
                _ => 16,
            }),
            LogicalType::Null
            | LogicalType::Varchar
            | LogicalType::Blob
            | LogicalType::Struct(_)
            | LogicalType::List(_) => None,
        }
    }

    pub fn name(&self) -> String {
        match self {
            LogicalType::Null => "NULL".to_string(),
            LogicalType::Boolean => "BOOLEAN".to_string(),
            LogicalType::TinyInt => "TINYINT".to_string(),
            LogicalType::SmallInt => "SMALLINT".to_string(),
            LogicalType::Integer => "INTEGER".to_string(),
            LogicalType::BigInt => "BIGINT".to_string(),
            LogicalType::Date => "DATE".to_string(),
            LogicalType::Time => "TIME".to_string(),
            LogicalType::Timestamp => "TIMESTAMP".to_string(),
            LogicalType::Decimal { width, scale } => format!("DECIMAL({width},{scale})"),
            LogicalType::Float => "FLOAT".to_string(),
            LogicalType::Double => "DOUBLE".to_string(),
            LogicalType::Varchar => "VARCHAR".to_string(),
            LogicalType::Blob => "BLOB".to_string(),
            LogicalType::UTinyInt => "UTINYINT".to_string(),
            LogicalType::USmallInt => "USMALLINT".to_string(),
            LogicalType::UInteger => "UINTEGER".to_string(),
            LogicalType::UBigInt => "UBIGINT".to_string(),
            LogicalType::HugeInt => "HUGEINT".to_string(),
            LogicalType::Struct(fields) => {
                let inner = fields
                    .iter()
                    .map(|(name, ty)| format!("{name} {}", ty.name()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("STRUCT({inner})")
            }
            LogicalType::List(child) => format!("{}[]", child.name()),
        }
    }
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

/// A single cell. Signed integers, dates (days), times and timestamps (micros) and
/// decimals up to width 18 (unscaled) use `Int`.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i64),
    UInt(u64),
    HugeInt(i128),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    List(Vec<Value>),
    Struct(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::HugeInt(_) => "hugeint",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::List(_) => "list",
            Value::Struct(_) => "struct",
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Vector {
    pub logical_type: LogicalType,
    pub values: Vec<Value>,
}

impl Vector {
    pub fn new(logical_type: LogicalType, values: Vec<Value>) -> Self {
        Self {
            logical_type,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One fetched batch of rows, column-major.
#[derive(Clone, Debug, PartialEq)]
pub struct DataChunk {
    pub row_count: usize,
    pub columns: Vec<Vector>,
}

impl DataChunk {
    pub fn new(columns: Vec<Vector>) -> Self {
        let row_count = columns.first().map(Vector::len).unwrap_or(0);
        Self { row_count, columns }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row(&self, index: usize) -> Option<Vec<Value>> {
        if index >= self.row_count {
            return None;
        }
        self.columns
            .iter()
            .map(|column| column.values.get(index).cloned())
            .collect()
    }
}

/// Simplified lexical class reported by `/ddb/tokenize`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Identifier,
    NumericConstant,
    StringConstant,
    Operator,
    Keyword,
    Comment,
}

impl TokenKind {
    pub fn code(self) -> u8 {
        match self {
            TokenKind::Identifier => 0,
            TokenKind::NumericConstant => 1,
            TokenKind::StringConstant => 2,
            TokenKind::Operator => 3,
            TokenKind::Keyword => 4,
            TokenKind::Comment => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TokenKind::Identifier),
            1 => Some(TokenKind::NumericConstant),
            2 => Some(TokenKind::StringConstant),
            3 => Some(TokenKind::Operator),
            4 => Some(TokenKind::Keyword),
            5 => Some(TokenKind::Comment),
            _ => None,
        }
    }
}
