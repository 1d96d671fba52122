mod client;
pub mod model;
mod operations;
pub mod retry;
mod transfer;
mod tree;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use client::{ConservatorClient, ConservatorError, DEFAULT_BASE_URL, TransportError};
pub use model::{
    Collection, CreatedMedia, DatasetRef, FileLockerFile, MediaFile, MediaKind, SignedUrl, User,
};
pub use operations::PAGE_SIZE;
pub use retry::{RetryError, RetryPolicy};
pub use transfer::{TransferClient, TransferError};
pub use tree::RemoteTree;
