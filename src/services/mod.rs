pub mod ledger;
pub mod pipeline;
pub mod storage;
pub mod unpack;
pub mod uploader;
