use super::{check_positive, window_output};
use crate::{bad_parameter, Error};

/// 二维卷积配置。
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct ConvDesc {
    /// 上、下、左、右
    pub pads: [usize; 4],
    pub strides: [usize; 2],
    pub dilations: [usize; 2],
    pub groups: usize,
    pub pad_value: f32,
}

impl ConvDesc {
    pub const EMPTY: Self = Self {
        pads: [0; 4],
        strides: [1; 2],
        dilations: [1; 2],
        groups: 1,
        pad_value: 0.,
    };

    fn check(&self) -> Result<(), Error> {
        check_positive("strides", &self.strides)?;
        check_positive("dilations", &self.dilations)?;
        check_positive("groups", &[self.groups])?;
        if !self.pad_value.is_finite() {
            return Err(bad_parameter(format!(
                "pad value {} is not finite",
                self.pad_value
            )));
        }
        Ok(())
    }

    /// 输入 `[c, h, w]`、卷积核 `[m, c / groups, hk, wk]` 时输出的 `[m, hy, wy]`。
    pub fn output_dim(&self, input: [usize; 3], kernel: [usize; 4]) -> Result<[usize; 3], Error> {
        self.check()?;
        let [c, h, w] = input;
        let [m, ck, hk, wk] = kernel;
        if c % self.groups != 0 || m % self.groups != 0 {
            return Err(bad_parameter(format!(
                "channels {c} -> {m} can't be split into {} groups",
                self.groups
            )));
        }
        if ck.checked_mul(self.groups) != Some(c) {
            return Err(bad_parameter(format!(
                "kernel expects {ck} x {} input channels, got {c}",
                self.groups
            )));
        }
        let [hy, wy] = window_output([h, w], [hk, wk], self.strides, self.dilations, self.pads)?;
        Ok([m, hy, wy])
    }
}

config!(ConvDesc: Convolution);
