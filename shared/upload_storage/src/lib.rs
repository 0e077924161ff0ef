//! Upload ledger storage
//!
//! This crate records uploads that were confirmed present in object storage and lists them
//! back. It knows nothing about object storage itself; callers are responsible for verifying
//! an object exists before recording it.

pub mod uploaded_image;
