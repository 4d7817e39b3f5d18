//! Conversion between host values, [`ForeignValue`]s and raw bytes.
//!
//! Scalars are handled in `conversions`, structs and arrays in
//! `struct_marshal`. All encodings use native byte order.

mod conversions;
mod cvalue;
mod struct_marshal;

pub(crate) use conversions::{sign_extend, zero_extend};
pub use cvalue::ForeignValue;
