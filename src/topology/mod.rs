//! Where the client learns which servers make up a bucket.

pub mod provider;

pub use provider::{
    ConfigurationProvider, Reconfigurable, StaticConfigurationProvider, TopologyError,
    DEFAULT_BUCKET,
};
