//! Named integer-tuple spaces.
//!
//! A space describes the columns of a set or map:
//! - parameters (symbolic constants shared by every tuple)
//! - the input tuple (maps only)
//! - the output tuple (the set tuple for sets)

use serde::{Deserialize, Serialize};
use std::fmt;

/// One named tuple: an optional tuple name and its dimension names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Tuple {
    /// Tuple name, e.g. `S` in `S[i, j]`
    pub name: Option<String>,
    /// Dimension names
    pub dims: Vec<String>,
}

impl Tuple {
    /// An anonymous tuple with the given dimension names.
    pub fn new<S: Into<String>>(dims: impl IntoIterator<Item = S>) -> Self {
        Self { name: None, dims: dims.into_iter().map(Into::into).collect() }
    }

    /// An anonymous tuple of `n` dimensions named `prefix0 .. prefix{n-1}`.
    pub fn anonymous(prefix: &str, n: usize) -> Self {
        Self::new((0..n).map(|i| format!("{}{}", prefix, i)))
    }

    /// Number of dimensions.
    pub fn len(&self) -> usize {
        self.dims.len()
    }

    /// True for a zero-dimensional tuple.
    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{}", name)?;
        }
        write!(f, "[{}]", self.dims.join(", "))
    }
}

/// The space of a set (`input == None`) or a map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PBSpace {
    /// Parameter names
    pub params: Vec<String>,
    /// Input tuple (maps only)
    pub input: Option<Tuple>,
    /// Output tuple, or the set tuple
    pub output: Tuple,
}

impl PBSpace {
    /// A set space.
    pub fn set(params: Vec<String>, tuple: Tuple) -> Self {
        Self { params, input: None, output: tuple }
    }

    /// A map space.
    pub fn map(params: Vec<String>, input: Tuple, output: Tuple) -> Self {
        Self { params, input: Some(input), output }
    }

    /// Check if this is a set space.
    pub fn is_set(&self) -> bool {
        self.input.is_none()
    }

    /// Number of parameters.
    pub fn n_param(&self) -> usize {
        self.params.len()
    }

    /// Number of input dimensions (0 for sets).
    pub fn n_in(&self) -> usize {
        self.input.as_ref().map_or(0, Tuple::len)
    }

    /// Number of output (set) dimensions.
    pub fn n_out(&self) -> usize {
        self.output.len()
    }

    /// Number of tuple dimensions (input plus output).
    pub fn n_dim(&self) -> usize {
        self.n_in() + self.n_out()
    }

    /// Number of fixed columns: parameters and tuple dimensions.
    pub fn n_fixed(&self) -> usize {
        self.n_param() + self.n_dim()
    }

    /// Column names in column order: parameters, input, output.
    pub fn column_names(&self) -> Vec<String> {
        let mut names = self.params.clone();
        if let Some(input) = &self.input {
            names.extend(input.dims.iter().cloned());
        }
        names.extend(self.output.dims.iter().cloned());
        names
    }

    /// Same tuple arities (parameters are aligned separately).
    pub fn is_compatible(&self, other: &PBSpace) -> bool {
        self.is_set() == other.is_set()
            && self.n_in() == other.n_in()
            && self.n_out() == other.n_out()
    }

    /// The space with input and output swapped.
    pub fn reversed(&self) -> Self {
        debug_assert!(!self.is_set());
        Self {
            params: self.params.clone(),
            input: Some(self.output.clone()),
            output: self.input.clone().unwrap_or_default(),
        }
    }

    /// The set space of the input tuple.
    pub fn domain(&self) -> Self {
        Self::set(self.params.clone(), self.input.clone().unwrap_or_default())
    }

    /// The set space of the output tuple.
    pub fn range(&self) -> Self {
        Self::set(self.params.clone(), self.output.clone())
    }

    /// Tuple dimension names made unique against parameter names.
    pub(crate) fn disambiguated(&self) -> Self {
        let mut out = self.clone();
        let mut taken: Vec<String> = self.params.clone();
        let fix = |dims: &mut Vec<String>, taken: &mut Vec<String>| {
            for d in dims.iter_mut() {
                if taken.contains(d) {
                    let mut k = 0;
                    while taken.contains(&format!("{}_{}", d, k)) {
                        k += 1;
                    }
                    *d = format!("{}_{}", d, k);
                }
                taken.push(d.clone());
            }
        };
        if let Some(input) = out.input.as_mut() {
            fix(&mut input.dims, &mut taken);
        }
        fix(&mut out.output.dims, &mut taken);
        out
    }
}

impl fmt::Display for PBSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.params.is_empty() {
            write!(f, "[{}] -> ", self.params.join(", "))?;
        }
        match &self.input {
            Some(input) => write!(f, "{{ {} -> {} }}", input, self.output),
            None => write!(f, "{{ {} }}", self.output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_space() {
        let s = PBSpace::map(vec!["N".into()], Tuple::new(["i", "j"]), Tuple::new(["k"]));
        assert_eq!(s.n_fixed(), 4);
        assert_eq!(s.column_names(), vec!["N", "i", "j", "k"]);
        let r = s.reversed();
        assert_eq!(r.n_in(), 1);
        assert_eq!(r.n_out(), 2);
        assert_eq!(r.to_string(), "[N] -> { [k] -> [i, j] }");
    }

    #[test]
    fn test_disambiguate() {
        let s = PBSpace::set(vec!["i".into()], Tuple::new(["i", "j"]));
        assert_eq!(s.disambiguated().output.dims, vec!["i_0", "j"]);
    }
}
