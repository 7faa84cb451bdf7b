use crate::dtype::{DType, Element};
use crate::error::Error;
use crate::Device;
use ndarray::{ArrayD, IxDyn, ShapeError};

/// Dense feature tensor: a leading dimension sized to the number of logical
/// elements (nodes or edges) followed by an arbitrary-rank feature shape.
#[derive(Clone, Debug)]
pub struct Array<T: Element> {
    pub(crate) data: ArrayD<T>,
    device: Device,
}

impl<T: Element> Array<T> {
    pub fn new(data: ArrayD<T>) -> Self {
        Self {
            data,
            device: Device::Cpu,
        }
    }

    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> Result<Self, Error> {
        let actual_len = data.len();
        let map_err = |_e: ShapeError| Error::ShapeMismatch {
            expected: shape.to_vec(),
            actual: vec![actual_len],
        };
        let array = ArrayD::from_shape_vec(IxDyn(shape), data).map_err(map_err)?;
        Ok(Self::new(array))
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::new(ArrayD::from_elem(IxDyn(shape), T::zero()))
    }

    pub fn ones(shape: &[usize]) -> Self {
        Self::new(ArrayD::from_elem(IxDyn(shape), T::one()))
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the array contains no elements
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Retags the handle with another device. No data moves; the CPU engine
    /// refuses retagged tensors at dispatch time.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    /// Number of rows along the leading (graph) dimension.
    pub fn rows(&self) -> usize {
        self.shape().first().copied().unwrap_or(0)
    }

    /// Trailing feature shape with the leading dimension stripped.
    pub fn feature_shape(&self) -> &[usize] {
        let shape = self.shape();
        if shape.is_empty() {
            shape
        } else {
            &shape[1..]
        }
    }

    /// Elements per leading-dimension row.
    pub fn row_len(&self) -> usize {
        self.feature_shape().iter().product()
    }

    pub fn get_data(&self) -> &ArrayD<T> {
        &self.data
    }

    pub fn get_data_mut(&mut self) -> &mut ArrayD<T> {
        &mut self.data
    }

    pub fn as_slice(&self) -> &[T] {
        self.data
            .as_slice()
            .expect("feature tensor storage must be contiguous")
    }

    pub fn as_slice_mut(&mut self) -> &mut [T] {
        self.data
            .as_slice_mut()
            .expect("feature tensor storage must be contiguous")
    }

    pub fn into_raw_vec(self) -> Vec<T> {
        self.data.into_raw_vec_and_offset().0
    }
}

/// Dtype-erased feature tensor.
///
/// The runtime tagged union the dispatch layer matches on to expand an
/// erased kernel call into one of the four fixed `Element` instantiations.
#[derive(Clone, Debug)]
pub enum FeatureTensor {
    Float32(Array<f32>),
    Float64(Array<f64>),
    Int32(Array<i32>),
    Int64(Array<i64>),
}

impl FeatureTensor {
    pub fn dtype(&self) -> DType {
        match self {
            FeatureTensor::Float32(_) => DType::Float32,
            FeatureTensor::Float64(_) => DType::Float64,
            FeatureTensor::Int32(_) => DType::Int32,
            FeatureTensor::Int64(_) => DType::Int64,
        }
    }

    pub fn device(&self) -> Device {
        match self {
            FeatureTensor::Float32(a) => a.device(),
            FeatureTensor::Float64(a) => a.device(),
            FeatureTensor::Int32(a) => a.device(),
            FeatureTensor::Int64(a) => a.device(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            FeatureTensor::Float32(a) => a.shape(),
            FeatureTensor::Float64(a) => a.shape(),
            FeatureTensor::Int32(a) => a.shape(),
            FeatureTensor::Int64(a) => a.shape(),
        }
    }
}

impl From<Array<f32>> for FeatureTensor {
    fn from(a: Array<f32>) -> Self {
        FeatureTensor::Float32(a)
    }
}

impl From<Array<f64>> for FeatureTensor {
    fn from(a: Array<f64>) -> Self {
        FeatureTensor::Float64(a)
    }
}

impl From<Array<i32>> for FeatureTensor {
    fn from(a: Array<i32>) -> Self {
        FeatureTensor::Int32(a)
    }
}

impl From<Array<i64>> for FeatureTensor {
    fn from(a: Array<i64>) -> Self {
        FeatureTensor::Int64(a)
    }
}

/// Typed view into a [`FeatureTensor`], implemented for exactly the four
/// supported element types. Used by the dispatch layer after it has selected
/// an instantiation from the output tensor's dtype tag.
pub trait TypedFeature: Element {
    fn unpack(tensor: &FeatureTensor) -> Option<&Array<Self>>;
    fn unpack_mut(tensor: &mut FeatureTensor) -> Option<&mut Array<Self>>;
}

macro_rules! impl_typed_feature {
    ($t:ty, $variant:ident) => {
        impl TypedFeature for $t {
            fn unpack(tensor: &FeatureTensor) -> Option<&Array<Self>> {
                match tensor {
                    FeatureTensor::$variant(a) => Some(a),
                    _ => None,
                }
            }

            fn unpack_mut(tensor: &mut FeatureTensor) -> Option<&mut Array<Self>> {
                match tensor {
                    FeatureTensor::$variant(a) => Some(a),
                    _ => None,
                }
            }
        }
    };
}

impl_typed_feature!(f32, Float32);
impl_typed_feature!(f64, Float64);
impl_typed_feature!(i32, Int32);
impl_typed_feature!(i64, Int64);
