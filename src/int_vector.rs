use core::ops::{Add, Index, IndexMut, Mul, Neg, Sub};
use serde::{Deserialize, Serialize};




/**
 * A D-dimensional integer vector, used for index offsets, ghost widths, and
 * refinement ratios.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntVector<const D: usize>(#[serde(with = "array")] pub [i64; D]);




// ============================================================================
impl<const D: usize> IntVector<D> {


    pub fn new(values: [i64; D]) -> Self {
        Self(values)
    }


    /**
     * Return a vector with the same value on every axis.
     */
    pub fn uniform(value: i64) -> Self {
        Self([value; D])
    }


    pub fn zero() -> Self {
        Self::uniform(0)
    }


    pub fn one() -> Self {
        Self::uniform(1)
    }


    /**
     * Return the unit vector along the given axis.
     */
    pub fn unit(axis: usize) -> Self {
        let mut v = Self::zero();
        v.0[axis] = 1;
        v
    }


    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&x| x == 0)
    }


    /**
     * Determine whether every component is strictly positive (valid as a
     * refinement ratio).
     */
    pub fn is_positive(&self) -> bool {
        self.0.iter().all(|&x| x > 0)
    }


    /**
     * Determine whether every component is non-negative (valid as a ghost
     * width).
     */
    pub fn is_non_negative(&self) -> bool {
        self.0.iter().all(|&x| x >= 0)
    }


    pub fn is_one(&self) -> bool {
        self.0.iter().all(|&x| x == 1)
    }


    /**
     * Return the per-axis minimum of two vectors.
     */
    pub fn component_min(&self, other: &Self) -> Self {
        let mut v = *self;
        for d in 0..D {
            v.0[d] = v.0[d].min(other.0[d])
        }
        v
    }


    pub fn component_max(&self, other: &Self) -> Self {
        let mut v = *self;
        for d in 0..D {
            v.0[d] = v.0[d].max(other.0[d])
        }
        v
    }


    /**
     * Return the product of the components.
     */
    pub fn product(&self) -> i64 {
        self.0.iter().product()
    }


    /**
     * Cyclically permute the components so that the given axis comes first.
     * This is the index order used by face-centered data normal to that axis.
     */
    pub fn permuted(&self, axis: usize) -> Self {
        let mut v = *self;
        for d in 0..D {
            v.0[d] = self.0[(d + axis) % D]
        }
        v
    }


    pub fn as_array(&self) -> [i64; D] {
        self.0
    }
}




// ============================================================================
impl<const D: usize> Index<usize> for IntVector<D> {
    type Output = i64;

    fn index(&self, axis: usize) -> &i64 {
        &self.0[axis]
    }
}

impl<const D: usize> IndexMut<usize> for IntVector<D> {
    fn index_mut(&mut self, axis: usize) -> &mut i64 {
        &mut self.0[axis]
    }
}

impl<const D: usize> Add for IntVector<D> {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        for d in 0..D {
            self.0[d] += other.0[d]
        }
        self
    }
}

impl<const D: usize> Sub for IntVector<D> {
    type Output = Self;

    fn sub(mut self, other: Self) -> Self {
        for d in 0..D {
            self.0[d] -= other.0[d]
        }
        self
    }
}

impl<const D: usize> Neg for IntVector<D> {
    type Output = Self;

    fn neg(mut self) -> Self {
        for d in 0..D {
            self.0[d] = -self.0[d]
        }
        self
    }
}

impl<const D: usize> Mul for IntVector<D> {
    type Output = Self;

    fn mul(mut self, other: Self) -> Self {
        for d in 0..D {
            self.0[d] *= other.0[d]
        }
        self
    }
}

impl<const D: usize> From<[i64; D]> for IntVector<D> {
    fn from(values: [i64; D]) -> Self {
        Self(values)
    }
}

impl<const D: usize> Default for IntVector<D> {
    fn default() -> Self {
        Self::zero()
    }
}




/**
 * Serde adapter for const-generic integer arrays, which serde's derive does
 * not cover. The array is written as a sequence of its components.
 */
pub(crate) mod array {

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use core::convert::TryInto;

    pub fn serialize<S: Serializer, const D: usize>(values: &[i64; D], serializer: S) -> Result<S::Ok, S::Error> {
        values[..].serialize(serializer)
    }

    pub fn deserialize<'de, De: Deserializer<'de>, const D: usize>(deserializer: De) -> Result<[i64; D], De::Error> {
        let values = Vec::<i64>::deserialize(deserializer)?;
        let len = values.len();
        values
            .try_into()
            .map_err(|_| De::Error::invalid_length(len, &"one integer per axis"))
    }
}
