//! Copying variants of the set and map operations.
//!
//! The methods on [`PBSet`] and [`PBMap`] consume their operands. The
//! functions here take references and leave the operands usable; the
//! representation is shared, so the copy is a reference-count bump.

use super::map::PBMap;
use super::set::PBSet;

/// Operations common to sets and maps.
pub trait PBOps: Clone {
    fn intersect(self, other: Self) -> Self;
    fn union(self, other: Self) -> Self;
    fn subtract(self, other: Self) -> Self;
    fn complement(self) -> Self;
    fn is_empty(&self) -> bool;
    fn is_subset(&self, other: &Self) -> bool;
    fn is_equal(&self, other: &Self) -> bool;
}

macro_rules! impl_pb_ops {
    ($ty:ident) => {
        impl<'c> PBOps for $ty<'c> {
            fn intersect(self, other: Self) -> Self {
                $ty::intersect(self, other)
            }
            fn union(self, other: Self) -> Self {
                $ty::union(self, other)
            }
            fn subtract(self, other: Self) -> Self {
                $ty::subtract(self, other)
            }
            fn complement(self) -> Self {
                $ty::complement(self)
            }
            fn is_empty(&self) -> bool {
                $ty::is_empty(self)
            }
            fn is_subset(&self, other: &Self) -> bool {
                $ty::is_subset(self, other)
            }
            fn is_equal(&self, other: &Self) -> bool {
                $ty::is_equal(self, other)
            }
        }
    };
}

impl_pb_ops!(PBSet);
impl_pb_ops!(PBMap);

pub fn intersect<T: PBOps>(a: &T, b: &T) -> T {
    a.clone().intersect(b.clone())
}

pub fn union<T: PBOps>(a: &T, b: &T) -> T {
    a.clone().union(b.clone())
}

pub fn subtract<T: PBOps>(a: &T, b: &T) -> T {
    a.clone().subtract(b.clone())
}

pub fn complement<T: PBOps>(a: &T) -> T {
    a.clone().complement()
}

pub fn reverse<'c>(m: &PBMap<'c>) -> PBMap<'c> {
    m.clone().reverse()
}

pub fn domain<'c>(m: &PBMap<'c>) -> PBSet<'c> {
    m.clone().domain()
}

pub fn range<'c>(m: &PBMap<'c>) -> PBSet<'c> {
    m.clone().range()
}

pub fn apply<'c>(s: &PBSet<'c>, m: &PBMap<'c>) -> PBSet<'c> {
    s.clone().apply(m.clone())
}

pub fn apply_range<'c>(a: &PBMap<'c>, b: &PBMap<'c>) -> PBMap<'c> {
    a.clone().apply_range(b.clone())
}

pub fn intersect_domain<'c>(m: &PBMap<'c>, s: &PBSet<'c>) -> PBMap<'c> {
    m.clone().intersect_domain(s.clone())
}

pub fn intersect_range<'c>(m: &PBMap<'c>, s: &PBSet<'c>) -> PBMap<'c> {
    m.clone().intersect_range(s.clone())
}

#[cfg(test)]
mod tests {
    use super::super::PBCtx;
    use super::*;

    #[test]
    fn test_copy_variants_keep_operands() {
        let ctx = PBCtx::new();
        let a = PBSet::parse(&ctx, "{ [i] : 0 <= i < 8 }").unwrap();
        let b = PBSet::parse(&ctx, "{ [i] : 4 <= i < 12 }").unwrap();
        let both = intersect(&a, &b);
        let either = union(&a, &b);
        let only_a = subtract(&a, &b);
        assert!(union(&both, &only_a).is_equal(&a));
        assert!(subtract(&either, &a).is_equal(&subtract(&b, &a)));
        assert!(intersect(&complement(&a), &a).is_empty());

        let m = PBMap::parse(&ctx, "{ [i] -> [i + 4] }").unwrap();
        assert!(apply(&a, &m).is_equal(&intersect(&apply(&a, &m), &either)));
        assert!(domain(&intersect_range(&m, &b)).is_equal(&PBSet::parse(&ctx, "{ [i] : 0 <= i < 8 }").unwrap()));
        assert!(range(&reverse(&m)).is_subset(&domain(&apply_range(&m, &reverse(&m)))));
        assert!(!intersect_domain(&m, &a).is_empty());
    }
}
