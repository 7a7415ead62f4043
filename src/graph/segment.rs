//! Segment reductions.
//!
//! A [Segments] structure stores, as a compressed row matrix of shape (nb_segments, nb_items), which segment
//! each item belongs to. Row s of the matrix lists the items of segment s in increasing order.
//! The same structure serves to
//! - sum messages into their destination node (segment = destination node, item = edge)
//! - reduce node states into graph vectors (segment = graph, item = node)
//! - partition node states by graph for cross graph attention.
//!
//! Reductions act on candle tensors of shape (nb_items, dim) and are differentiable.
//! Sums go through `index_add`, which accumulates items in increasing order, max runs in parallel over segments.

use anyhow::anyhow;

use std::fmt;
use std::str::FromStr;

use candle_core::{Device, Tensor};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sprs::{CsMatI, TriMatI};

use crate::nn::tensor::index_tensor;

/// The permutation invariant reductions available over a segment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    Sum,
    Mean,
    /// sum divided by square root of segment size
    SqrtN,
    /// an empty segment gives a zero vector
    Max,
}

impl FromStr for AggregationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(AggregationType::Sum),
            "mean" => Ok(AggregationType::Mean),
            "sqrt_n" => Ok(AggregationType::SqrtN),
            "max" => Ok(AggregationType::Max),
            _ => {
                log::error!("unknown aggregation type : {}", s);
                Err(anyhow!("unknown aggregation type \"{}\", expected one of sum, mean, sqrt_n, max", s))
            }
        }
    }
} // end of impl FromStr for AggregationType

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            AggregationType::Sum => "sum",
            AggregationType::Mean => "mean",
            AggregationType::SqrtN => "sqrt_n",
            AggregationType::Max => "max",
        };
        write!(f, "{}", name)
    }
}

//====================================================================================

pub struct Segments {
    /// membership matrix, entry (s, i) is 1 if item i is in segment s
    membership: CsMatI<u32, usize>,
    /// segment of each item, as a u32 tensor
    ids: Tensor,
    device: Device,
} // end of Segments

impl Segments {
    /// segment_ids[i] is the segment of item i. All ids must be less than nb_segments,
    /// segments may be empty.
    pub fn new(segment_ids: &[usize], nb_segments: usize, device: &Device) -> anyhow::Result<Self> {
        if let Some((item, segment)) = segment_ids.iter().enumerate().find(|(_, s)| **s >= nb_segments) {
            log::error!("Segments::new item {} has segment {}, nb_segments is {}", item, segment, nb_segments);
            return Err(anyhow!("item {} has segment id {} not less than number of segments {}", item, segment, nb_segments));
        }
        let nb_items = segment_ids.len();
        let rows = segment_ids.to_vec();
        let cols = (0..nb_items).collect::<Vec<usize>>();
        let values = vec![1u32; nb_items];
        let trimat = TriMatI::<u32, usize>::from_triplets((nb_segments, nb_items), rows, cols, values);
        let membership: CsMatI<u32, usize> = trimat.to_csr();
        let ids = index_tensor(segment_ids, device)?;
        Ok(Segments { membership, ids, device: device.clone() })
    } // end of new

    pub fn get_nb_segments(&self) -> usize {
        self.membership.rows()
    }

    pub fn get_nb_items(&self) -> usize {
        self.membership.cols()
    }

    /// items of a segment, in increasing order
    pub fn get_members(&self, segment: usize) -> &[usize] {
        let range = self.membership.indptr().outer_inds_sz(segment);
        &self.membership.indices()[range]
    }

    /// number of items in segment
    pub fn get_count(&self, segment: usize) -> usize {
        self.membership.indptr().nnz_in_outer_sz(segment)
    }

    pub fn get_counts(&self) -> Vec<usize> {
        (0..self.get_nb_segments()).map(|s| self.get_count(s)).collect()
    }

    /// segment of each item as a u32 tensor
    pub fn get_ids(&self) -> &Tensor {
        &self.ids
    }

    fn check_values(&self, values: &Tensor) -> anyhow::Result<usize> {
        let (nb_rows, dim) = values.dims2()?;
        if nb_rows != self.get_nb_items() {
            log::error!("segment reduction got {} rows, expected {}", nb_rows, self.get_nb_items());
            return Err(anyhow!("segment reduction got {} rows, expected {}", nb_rows, self.get_nb_items()));
        }
        Ok(dim)
    }

    /// row s of result is the sum of rows of values belonging to segment s
    pub fn sum(&self, values: &Tensor) -> anyhow::Result<Tensor> {
        let dim = self.check_values(values)?;
        let zeros = Tensor::zeros((self.get_nb_segments(), dim), values.dtype(), &self.device)?;
        if self.get_nb_items() == 0 {
            return Ok(zeros);
        }
        Ok(zeros.index_add(&self.ids, values, 0)?)
    } // end of sum

    // sum with row s divided by scale(count of s), empty segments stay at 0
    fn scaled_sum(&self, values: &Tensor, scale: fn(usize) -> f64) -> anyhow::Result<Tensor> {
        let reduced = self.sum(values)?;
        let factors: Vec<f64> = self.get_counts().into_iter().map(|c| if c > 0 { 1. / scale(c) } else { 0. }).collect();
        let factors = Tensor::from_vec(factors, (self.get_nb_segments(), 1), &self.device)?.to_dtype(values.dtype())?;
        Ok(reduced.broadcast_mul(&factors)?)
    }

    /// sum divided by segment size, empty segments give 0
    pub fn mean(&self, values: &Tensor) -> anyhow::Result<Tensor> {
        self.scaled_sum(values, |c| c as f64)
    }

    /// sum divided by the square root of segment size, empty segments give 0
    pub fn sqrt_n(&self, values: &Tensor) -> anyhow::Result<Tensor> {
        self.scaled_sum(values, |c| (c as f64).sqrt())
    }

    /// componentwise max over a segment.
    /// Empty segments are detected from the membership matrix and left at zero.
    pub fn max(&self, values: &Tensor) -> anyhow::Result<Tensor> {
        let dim = self.check_values(values)?;
        if self.get_nb_segments() == 0 {
            return Ok(Tensor::zeros((0, dim), values.dtype(), &self.device)?);
        }
        let rows = (0..self.get_nb_segments())
            .into_par_iter()
            .map(|segment| {
                let members = self.get_members(segment);
                if members.is_empty() {
                    return Ok(Tensor::zeros((1, dim), values.dtype(), &self.device)?);
                }
                let member_rows = values.index_select(&index_tensor(members, &self.device)?, 0)?;
                Ok(member_rows.max_keepdim(0)?)
            })
            .collect::<anyhow::Result<Vec<Tensor>>>()?;
        Ok(Tensor::cat(&rows, 0)?)
    } // end of max

    pub fn reduce(&self, values: &Tensor, aggregation: AggregationType) -> anyhow::Result<Tensor> {
        match aggregation {
            AggregationType::Sum => self.sum(values),
            AggregationType::Mean => self.mean(values),
            AggregationType::SqrtN => self.sqrt_n(values),
            AggregationType::Max => self.max(values),
        }
    }
} // end of impl Segments

/// rows of values at given indices (with repetitions)
pub fn gather_rows(values: &Tensor, indices: &Tensor) -> anyhow::Result<Tensor> {
    Ok(values.index_select(indices, 0)?)
}

/// a (nb_rows, dim) tensor with row k of rows at row indices\[k\], other rows at 0.
/// Indices are expected distinct.
pub fn scatter_rows(nb_rows: usize, indices: &Tensor, rows: &Tensor) -> anyhow::Result<Tensor> {
    let (nb_given, dim) = rows.dims2()?;
    let zeros = Tensor::zeros((nb_rows, dim), rows.dtype(), rows.device())?;
    if nb_given == 0 {
        return Ok(zeros);
    }
    Ok(zeros.index_add(indices, rows, 0)?)
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::nn::tensor::*;
    use ndarray::{arr2, Array2};

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn to_tensor(a: &Array2<f64>) -> Tensor {
        array2_to_tensor(&a.view(), &Device::Cpu).unwrap()
    }

    #[test]
    fn reductions_known_values() {
        log_init_test();
        // items 0,2 in segment 1, item 1 in segment 0, item 3 in segment 2
        let segments = Segments::new(&[1, 0, 1, 2], 3, &Device::Cpu).unwrap();
        assert_eq!(segments.get_members(1), &[0, 2]);
        assert_eq!(segments.get_counts(), vec![1, 2, 1]);
        let values = to_tensor(&arr2(&[[1., -1.], [2., 2.], [3., -5.], [4., 0.]]));
        let sum = tensor_to_array2::<f64>(&segments.sum(&values).unwrap()).unwrap();
        assert_eq!(sum, arr2(&[[2., 2.], [4., -6.], [4., 0.]]));
        let mean = tensor_to_array2::<f64>(&segments.mean(&values).unwrap()).unwrap();
        assert_eq!(mean, arr2(&[[2., 2.], [2., -3.], [4., 0.]]));
        let max = tensor_to_array2::<f64>(&segments.max(&values).unwrap()).unwrap();
        assert_eq!(max, arr2(&[[2., 2.], [3., -1.], [4., 0.]]));
        let sqrt_n = tensor_to_array2::<f64>(&segments.sqrt_n(&values).unwrap()).unwrap();
        assert!((sqrt_n[[1, 0]] - 4. / 2f64.sqrt()).abs() < 1.0E-12);
    } // end of reductions_known_values

    #[test]
    fn empty_segment_gives_zero() {
        log_init_test();
        // segment 1 is empty, values all negative
        let segments = Segments::new(&[0, 0, 2], 3, &Device::Cpu).unwrap();
        let values = array2_to_tensor(&arr2(&[[-3f32, -1.], [-2., -7.], [-1., -1.]]).view(), &Device::Cpu).unwrap();
        for aggregation in [AggregationType::Sum, AggregationType::Mean, AggregationType::SqrtN, AggregationType::Max] {
            let reduced = tensor_to_array2::<f32>(&segments.reduce(&values, aggregation).unwrap()).unwrap();
            assert_eq!(reduced.dim(), (3, 2));
            assert!(reduced.row(1).iter().all(|v| *v == 0f32), "aggregation {}", aggregation);
        }
        let max = tensor_to_array2::<f32>(&segments.max(&values).unwrap()).unwrap();
        assert_eq!(max.row(0).to_vec(), vec![-2f32, -1.]);
    }

    #[test]
    fn bad_input_rejected() {
        log_init_test();
        assert!(Segments::new(&[0, 3], 3, &Device::Cpu).is_err());
        let segments = Segments::new(&[0, 1], 2, &Device::Cpu).unwrap();
        let values = to_tensor(&Array2::<f64>::zeros((3, 2)));
        assert!(segments.sum(&values).is_err());
        assert!(segments.max(&values).is_err());
    }

    #[test]
    fn aggregation_names() {
        assert_eq!("sqrt_n".parse::<AggregationType>().unwrap(), AggregationType::SqrtN);
        assert_eq!("max".parse::<AggregationType>().unwrap(), AggregationType::Max);
        assert!("median".parse::<AggregationType>().is_err());
        assert_eq!(AggregationType::Mean.to_string(), "mean");
    }

    #[test]
    fn gather_scatter() {
        let values = to_tensor(&arr2(&[[0., 0.], [1., 1.], [2., 2.]]));
        let ids = index_tensor(&[2, 0, 2], &Device::Cpu).unwrap();
        let gathered = tensor_to_array2::<f64>(&gather_rows(&values, &ids).unwrap()).unwrap();
        assert_eq!(gathered, arr2(&[[2., 2.], [0., 0.], [2., 2.]]));
        let target_ids = index_tensor(&[1, 2], &Device::Cpu).unwrap();
        let scattered = scatter_rows(3, &target_ids, &to_tensor(&arr2(&[[5., 5.], [6., 6.]]))).unwrap();
        assert_eq!(tensor_to_array2::<f64>(&scattered).unwrap(), arr2(&[[0., 0.], [5., 5.], [6., 6.]]));
    }

    #[test]
    fn max_passes_gradient_to_argmax() {
        log_init_test();
        let segments = Segments::new(&[0, 0, 1], 2, &Device::Cpu).unwrap();
        let values = candle_core::Var::from_tensor(&to_tensor(&arr2(&[[1., 5.], [3., 2.], [-1., -1.]]))).unwrap();
        let loss = segments.max(values.as_tensor()).unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        let grad = tensor_to_array2::<f64>(grads.get(values.as_tensor()).unwrap()).unwrap();
        assert_eq!(grad, arr2(&[[0., 1.], [1., 0.], [1., 1.]]));
    }
} // end of mod tests
