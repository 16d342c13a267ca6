//! Model module for the road anomaly classifier, built with the Burn framework
//!
//! This module provides:
//! - The EfficientNet feature extractor (`backbone`)
//! - The CBAM channel + spatial attention block (`attention`)
//! - The fully connected classifier head (`head`)
//! - The wired network and its configuration (`network`, `config`)
//!
//! ## Architecture
//!
//! ```text
//! image [N,3,224,224] -> EfficientNet-B3 features [N,1536,7,7]
//!   -> CBAM (channel, then spatial) -> global avg pool -> [N,1536]
//!   -> classifier head -> logits [N,5]
//! ```

pub mod attention;
pub mod backbone;
pub mod config;
pub mod head;
pub mod network;

// Re-export main types for convenience
pub use attention::{Cbam, CbamConfig};
pub use backbone::Backbone;
pub use config::{BackboneConfig, ModelConfig};
pub use head::{ClassifierHead, ClassifierHeadConfig};
pub use network::RoadAnomalyNet;
