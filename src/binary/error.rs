use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BinaryError {
    #[error("unexpected end of binary data")]
    Eof,
    #[error("invalid token in stream: {0}")]
    InvalidToken(u8),
    #[error("invalid packed character: {0}")]
    InvalidPacked(u8),
    #[error("invalid node structure")]
    InvalidNode,
    #[error("attribute key was not a string")]
    NonStringKey,
    #[error("data is not valid UTF-8")]
    InvalidUtf8,
    #[error("received empty payload")]
    EmptyData,
    #[error("zlib decompression failed: {0}")]
    Zlib(String),
    #[error("{0} bytes left over after decoding")]
    LeftoverData(usize),
    #[error("missing required attribute '{0}'")]
    MissingAttr(String),
    #[error("attribute parse error: {0}")]
    AttrParse(String),
    #[error("multiple attribute errors: {0:?}")]
    AttrList(Vec<BinaryError>),
}

pub type Result<T> = std::result::Result<T, BinaryError>;
