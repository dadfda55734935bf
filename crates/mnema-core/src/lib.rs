pub mod cancel;
pub mod config;
pub mod constants;
pub mod edge;
pub mod error;
pub mod fact;
pub mod types;

pub use cancel::CancelToken;
pub use config::{EngineConfig, MetadataBackend};
pub use constants::*;
pub use edge::{Edge, EdgeRecord};
pub use error::MnemaError;
pub use fact::{Fact, FactRecord};
pub use types::{
    decode_metadata, encode_metadata, now_ms, EdgeId, FactId, Metadata, OwnerScope, Timestamp,
};
