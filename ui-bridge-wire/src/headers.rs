use base64::{Engine as _, engine::general_purpose::STANDARD};

pub const HEADER_REQUEST_DESCRIPTION: &str = "x-duckdb-ui-request-description";
pub const HEADER_CONNECTION_NAME: &str = "x-duckdb-ui-connection-name";
pub const HEADER_DATABASE_NAME: &str = "x-duckdb-ui-database-name";
pub const HEADER_SCHEMA_NAME: &str = "x-duckdb-ui-schema-name";
pub const HEADER_PARAMETER_COUNT: &str = "x-duckdb-ui-parameter-count";
pub const HEADER_PARAMETER_VALUE_PREFIX: &str = "x-duckdb-ui-parameter-value-";
pub const HEADER_RESULT_CHUNK_LIMIT: &str = "x-duckdb-ui-result-chunk-limit";
pub const HEADER_RESULT_DATABASE_NAME: &str = "x-duckdb-ui-result-database-name";
pub const HEADER_RESULT_SCHEMA_NAME: &str = "x-duckdb-ui-result-schema-name";
pub const HEADER_RESULT_TABLE_NAME: &str = "x-duckdb-ui-result-table-name";
pub const HEADER_RESULT_TABLE_CHUNK_LIMIT: &str = "x-duckdb-ui-result-table-chunk-limit";
pub const HEADER_ERRORS_AS_JSON: &str = "x-duckdb-ui-errors-as-json";

pub const HEADER_ENGINE_VERSION: &str = "x-duckdb-version";
pub const HEADER_ENGINE_PLATFORM: &str = "x-duckdb-platform";
pub const HEADER_UI_VERSION: &str = "x-duckdb-ui-extension-version";

pub const CONTENT_TYPE_ENVELOPE: &str = "application/octet-stream";

pub fn parameter_value_header(index: usize) -> String {
    format!("{HEADER_PARAMETER_VALUE_PREFIX}{index}")
}

/// Decodes a base64 header value. Absent and empty values decode to an empty string.
pub fn decode_base64_header(value: Option<&str>) -> Result<String, Base64HeaderError> {
    let Some(value) = value else {
        return Ok(String::new());
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    let bytes = STANDARD
        .decode(trimmed.as_bytes())
        .map_err(|err| Base64HeaderError::InvalidBase64(err.to_string()))?;
    String::from_utf8(bytes).map_err(|_| Base64HeaderError::InvalidUtf8)
}

pub fn encode_base64_header(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Base64HeaderError {
    InvalidBase64(String),
    InvalidUtf8,
}

impl std::fmt::Display for Base64HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Base64HeaderError::InvalidBase64(reason) => write!(f, "invalid base64: {reason}"),
            Base64HeaderError::InvalidUtf8 => write!(f, "decoded value is not valid utf-8"),
        }
    }
}

impl std::error::Error for Base64HeaderError {}
