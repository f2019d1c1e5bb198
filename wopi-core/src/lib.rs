mod client;
mod headers;

pub use client::{
    ApiErrorClass, CheckFileInfo, PutFileRequest, PutFileResponse, WopiClient, WopiError,
};
pub use headers::{
    ExtendedData, ExtendedDataError, HEADER_EXTENDED_DATA, HEADER_IS_AUTOSAVE,
    HEADER_IS_EXIT_SAVE, HEADER_IS_MODIFIED_BY_USER, HEADER_OVERRIDE,
};
