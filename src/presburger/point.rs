//! Concrete solutions of sets and maps.

use super::space::PBSpace;
use super::PBCtx;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use std::fmt;

/// One point `[params..., dims...]` of a set or map, or a void point when
/// there is no solution.
#[derive(Clone)]
pub struct PBPoint<'c> {
    ctx: &'c PBCtx,
    space: PBSpace,
    coords: Option<Vec<BigInt>>,
}

impl<'c> PBPoint<'c> {
    pub(crate) fn new(ctx: &'c PBCtx, space: PBSpace, coords: Vec<BigInt>) -> Self {
        debug_assert_eq!(coords.len(), space.n_fixed());
        Self { ctx, space, coords: Some(coords) }
    }

    pub(crate) fn void(ctx: &'c PBCtx, space: PBSpace) -> Self {
        Self { ctx, space, coords: None }
    }

    pub fn ctx(&self) -> &'c PBCtx {
        self.ctx
    }

    pub fn space(&self) -> &PBSpace {
        &self.space
    }

    pub fn is_void(&self) -> bool {
        self.coords.is_none()
    }

    /// All coordinates; empty for a void point.
    pub fn coords(&self) -> &[BigInt] {
        self.coords.as_deref().unwrap_or(&[])
    }

    /// Parameter coordinates.
    pub fn params(&self) -> &[BigInt] {
        let np = self.space.n_param();
        match &self.coords {
            Some(c) => &c[..np],
            None => &[],
        }
    }

    /// Tuple coordinates (input then output for maps).
    pub fn dims(&self) -> &[BigInt] {
        let np = self.space.n_param();
        match &self.coords {
            Some(c) => &c[np..],
            None => &[],
        }
    }

    /// Coordinates as machine integers, if every one fits.
    pub fn to_i64s(&self) -> Option<Vec<i64>> {
        self.coords.as_ref()?.iter().map(ToPrimitive::to_i64).collect()
    }
}

impl fmt::Display for PBPoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.coords {
            None => write!(f, "void"),
            Some(c) => {
                let strs: Vec<String> = c.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", strs.join(", "))
            }
        }
    }
}

impl fmt::Debug for PBPoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PBPoint({})", self)
    }
}
