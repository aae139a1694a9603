//! Graph builder, shape inference, repeat rules and dtype rules.

pub mod broadcast;
pub mod builder;
pub mod dtype_rules;
pub mod shape_inference;

pub use broadcast::{can_repeat, repeat_factors, repeated};
pub use dtype_rules::output_dtype;
pub use shape_inference::{ShapeError, infer_shape};
