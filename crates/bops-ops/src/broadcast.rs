//! Repeat-style broadcasting.
//!
//! A tensor broadcasts onto another when it tiles it exactly along every
//! dimension: each target dim is a whole multiple of the source dim.

use bops_core::Shape;

/// Whether `src` tiles `dst` exactly.
pub fn can_repeat(src: &Shape, dst: &Shape) -> bool {
    src.can_repeat_into(dst)
}

/// Number of copies of `src` along each dimension of `dst`, or None if `src`
/// does not tile `dst`.
pub fn repeat_factors(src: &Shape, dst: &Shape) -> Option<[i64; 4]> {
    if !can_repeat(src, dst) {
        return None;
    }
    Some(std::array::from_fn(|i| dst.0[i] / src.0[i]))
}

/// Shape obtained by tiling `ne` `nr[i]` times along dimension `i`.
pub fn repeated(ne: [i64; 4], nr: [i64; 4]) -> Shape {
    Shape::new(std::array::from_fn(|i| ne[i] * nr[i]))
}
