pub mod content_store;
pub mod media_type;
pub mod metadata_store;
pub mod splitter;
pub mod vault_service;
