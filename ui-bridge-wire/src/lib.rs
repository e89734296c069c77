mod binary;
mod envelope;
mod headers;
mod types;

pub use binary::{BinaryReader, BinaryWriter, MESSAGE_TERMINATOR_FIELD_ID, WireError};
pub use envelope::{
    ColumnNamesAndTypes, EmptyResult, ErrorResult, RunResult, SuccessResult, TokenizeResult,
    decode_empty_result, decode_run_result, decode_tokenize_result, encode_empty_result,
    encode_error_result, encode_success_result, encode_tokenize_result,
};
pub use headers::{
    Base64HeaderError, CONTENT_TYPE_ENVELOPE, HEADER_CONNECTION_NAME, HEADER_DATABASE_NAME,
    HEADER_ENGINE_PLATFORM, HEADER_ENGINE_VERSION, HEADER_ERRORS_AS_JSON, HEADER_PARAMETER_COUNT,
    HEADER_PARAMETER_VALUE_PREFIX, HEADER_REQUEST_DESCRIPTION, HEADER_RESULT_CHUNK_LIMIT,
    HEADER_RESULT_DATABASE_NAME, HEADER_RESULT_SCHEMA_NAME, HEADER_RESULT_TABLE_CHUNK_LIMIT,
    HEADER_RESULT_TABLE_NAME, HEADER_SCHEMA_NAME, HEADER_UI_VERSION, decode_base64_header,
    encode_base64_header, parameter_value_header,
};
pub use types::{DataChunk, LogicalType, TokenKind, Value, Vector};
