//! Backend abstraction
//!
//! Inference always runs on a non-autodiff backend: NdArray on the CPU, or CUDA
//! when the crate is built with the `cuda` feature.

/// CPU backend
pub type CpuBackend = burn_ndarray::NdArray<f32>;

/// GPU backend
#[cfg(feature = "cuda")]
pub type AcceleratorBackend = burn_cuda::Cuda;

/// Get the CPU device
pub fn cpu_device() -> <CpuBackend as burn::tensor::backend::Backend>::Device {
    Default::default()
}

/// Get the default accelerator device
#[cfg(feature = "cuda")]
pub fn accelerator_device() -> <AcceleratorBackend as burn::tensor::backend::Backend>::Device {
    Default::default()
}

/// Get a human-readable name for a backend choice
pub fn backend_name(accelerator: bool) -> &'static str {
    if accelerator {
        "CUDA (GPU)"
    } else {
        "NdArray (CPU)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_names() {
        assert_eq!(backend_name(false), "NdArray (CPU)");
        assert_eq!(backend_name(true), "CUDA (GPU)");
    }
}
