//! # Packet Normalisation Helpers
//!
//! Inbound radio packets arrive as loosely structured JSON trees: different
//! driver versions emit snake_case or camelCase keys, numeric fields as
//! strings, and payload bytes as base64. The helpers in this module bridge
//! that drift so the per-portnum handlers can work against one
//! representation.

pub mod convert;
pub mod node_id;
pub mod value;

pub use node_id::{candidate_node_id, canonical_node_id, node_num_from_id};
pub use value::{coerce_float, coerce_int, first, get, iso, merge_values};
