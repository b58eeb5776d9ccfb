//! 确定性的假网络与加载器. 仅用于实验目的.
//!
//! 输出只与体素自身的值有关, 因此滑窗融合后的结果是精确可预测的.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{Array4, ArrayView4};

use super::{InferenceError, ModelLoadError, Network, NetworkLoader};
use crate::consts::network::NUM_CLASSES;

/// 所有体素都预测为同一个类别.
#[derive(Debug, Clone)]
pub struct ConstantNetwork {
    class: usize,
    channels: usize,
}

impl ConstantNetwork {
    /// 目标类别的 logit. 其余类别为 0.
    pub const HIGH: f32 = 10.0;

    /// 105 个输出通道.
    #[inline]
    pub fn new(class: usize) -> Self {
        Self::with_channels(class, NUM_CLASSES)
    }

    /// 指定输出通道数.
    #[inline]
    pub fn with_channels(class: usize, channels: usize) -> Self {
        Self { class, channels }
    }
}

impl Network for ConstantNetwork {
    #[inline]
    fn out_channels(&self) -> usize {
        self.channels
    }

    fn predict(&mut self, tile: ArrayView4<f32>) -> Result<Array4<f32>, InferenceError> {
        let (_, a, b, c) = tile.dim();
        let mut ans = Array4::<f32>::zeros((self.channels, a, b, c));
        if self.class < self.channels {
            ans.index_axis_mut(ndarray::Axis(0), self.class).fill(Self::HIGH);
        }
        Ok(ans)
    }
}

/// 逐体素地由输入值决定类别.
pub struct FnNetwork<F> {
    channels: usize,
    f: F,
}

impl<F: FnMut(f32) -> usize + Send> FnNetwork<F> {
    /// `f` 将 (归一化后的) 体素值映射为类别.
    #[inline]
    pub fn new(channels: usize, f: F) -> Self {
        Self { channels, f }
    }
}

impl<F: FnMut(f32) -> usize + Send> Network for FnNetwork<F> {
    #[inline]
    fn out_channels(&self) -> usize {
        self.channels
    }

    fn predict(&mut self, tile: ArrayView4<f32>) -> Result<Array4<f32>, InferenceError> {
        let (_, a, b, c) = tile.dim();
        let mut ans = Array4::<f32>::zeros((self.channels, a, b, c));
        for ((_, i, j, k), v) in tile.indexed_iter() {
            let class = (self.f)(*v);
            if class < self.channels {
                ans[(class, i, j, k)] = ConstantNetwork::HIGH;
            }
        }
        Ok(ans)
    }
}

type Factory = Box<dyn Fn() -> Box<dyn Network> + Send + Sync>;

/// 忽略路径, 由闭包构造网络的加载器. 记录加载次数.
pub struct FakeLoader {
    factory: Factory,
    loads: AtomicUsize,
}

impl FakeLoader {
    /// 每次加载都调用 `factory`.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn Network> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            loads: AtomicUsize::new(0),
        }
    }

    /// 加载出 [`ConstantNetwork`].
    pub fn constant(class: usize, channels: usize) -> Self {
        Self::new(move || Box::new(ConstantNetwork::with_channels(class, channels)))
    }

    /// 已加载的次数.
    #[inline]
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl NetworkLoader for FakeLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn Network>, ModelLoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        log::debug!("假网络加载 {path:?}");
        Ok((self.factory)())
    }
}

/// 总是失败的加载器.
#[derive(Debug, Default)]
pub struct MissingLoader;

impl NetworkLoader for MissingLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn Network>, ModelLoadError> {
        Err(ModelLoadError::NotFound(path.to_path_buf()))
    }
}
