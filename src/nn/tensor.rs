//! Conversions between ndarray arrays (batches, metrics, dumps) and candle tensors (model computations).

use anyhow::anyhow;

use candle_core::{Device, Tensor};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use super::real::Real;

pub fn array2_to_tensor<F: Real>(a: &ArrayView2<F>, device: &Device) -> anyhow::Result<Tensor> {
    let values: Vec<F> = a.iter().copied().collect();
    Ok(Tensor::from_vec(values, a.dim(), device)?)
}

pub fn array1_to_tensor<F: Real>(a: &ArrayView1<F>, device: &Device) -> anyhow::Result<Tensor> {
    let values: Vec<F> = a.iter().copied().collect();
    Ok(Tensor::from_vec(values, a.len(), device)?)
}

pub fn tensor_to_array2<F: Real>(t: &Tensor) -> anyhow::Result<Array2<F>> {
    let (nrows, ncols) = t.dims2()?;
    let values = t.flatten_all()?.to_vec1::<F>()?;
    Ok(Array2::from_shape_vec((nrows, ncols), values)?)
}

pub fn tensor_to_array1<F: Real>(t: &Tensor) -> anyhow::Result<Array1<F>> {
    if t.rank() != 1 {
        log::error!("tensor_to_array1, got a tensor of shape {:?}", t.dims());
        return Err(anyhow!("tensor_to_array1, got a tensor of shape {:?}", t.dims()));
    }
    Ok(Array1::from(t.to_vec1::<F>()?))
}

/// row indices as a u32 tensor, for index_select and index_add
pub fn index_tensor(indices: &[usize], device: &Device) -> anyhow::Result<Tensor> {
    let ids: Vec<u32> = indices.iter().map(|i| *i as u32).collect();
    Ok(Tensor::from_vec(ids, indices.len(), device)?)
}

/// value of a tensor with one element
pub fn scalar_value<F: Real>(t: &Tensor) -> anyhow::Result<F> {
    Ok(t.flatten_all()?.to_vec1::<F>()?.first().copied().ok_or_else(|| anyhow!("scalar_value of an empty tensor"))?)
}

#[cfg(test)]
mod tests {

    use super::*;
    use ndarray::arr2;

    #[test]
    fn arrays_through_tensors() {
        let a = arr2(&[[1f32, 2.], [3., 4.], [5., 6.]]);
        let t = array2_to_tensor(&a.view(), &Device::Cpu).unwrap();
        assert_eq!(t.dims(), &[3, 2]);
        let back = tensor_to_array2::<f32>(&t.t().unwrap()).unwrap();
        assert_eq!(back, a.t());
        let ids = index_tensor(&[2, 0], &Device::Cpu).unwrap();
        let rows = tensor_to_array2::<f32>(&t.index_select(&ids, 0).unwrap()).unwrap();
        assert_eq!(rows, arr2(&[[5f32, 6.], [1., 2.]]));
        assert!(tensor_to_array1::<f32>(&t).is_err());
        assert_eq!(scalar_value::<f32>(&t.sum_all().unwrap()).unwrap(), 21f32);
    }
} // end of mod tests
