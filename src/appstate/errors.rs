use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppStateError {
    #[error("missing app state sync keys: {0:?}")]
    KeysNotFound(Vec<Vec<u8>>),
    #[error("failed to load app state sync key {0:?}: {1}")]
    GetKeyFailed(Vec<u8>, StoreError),
    #[error("mismatching content MAC for mutation")]
    MismatchingContentMac,
    #[error("mismatching index MAC for mutation")]
    MismatchingIndexMac,
    #[error("mismatching patch MAC")]
    MismatchingPatchMac,
    #[error("mismatching LTHash after applying patch")]
    MismatchingLtHash,
    #[error("mutation record is missing its {0}")]
    MissingRecordField(&'static str),
    #[error("value blob too short: {0} bytes")]
    ValueBlobTooShort(usize),
    #[error("value decryption failed: {0}")]
    Decrypt(#[from] crate::crypto::cbc::CbcError),
    #[error("protobuf decode failed: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("index JSON decode failed: {0}")]
    IndexJson(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("external patch blob required but no downloader is configured")]
    NoBlobDownloader,
    #[error("external patch blob download failed: {0}")]
    BlobDownload(String),
    #[error("sync IQ failed: {0}")]
    Iq(#[from] crate::request::IqError),
    #[error("malformed sync response: {0}")]
    MalformedResponse(&'static str),
}

pub type Result<T> = std::result::Result<T, AppStateError>;
