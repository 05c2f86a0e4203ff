use super::{check_positive, window_output};
use crate::{bad_parameter, Error};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PoolingMode {
    Max,
    /// 填充位置计入分母
    AverageIncludePad,
    AverageExcludePad,
}

/// 二维池化配置。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PoolingDesc {
    pub mode: PoolingMode,
    pub kernel: [usize; 2],
    pub strides: [usize; 2],
    /// 上、下、左、右
    pub pads: [usize; 4],
}

impl PoolingDesc {
    pub const EMPTY: Self = Self {
        mode: PoolingMode::Max,
        kernel: [1; 2],
        strides: [1; 2],
        pads: [0; 4],
    };

    fn check(&self) -> Result<(), Error> {
        check_positive("kernel", &self.kernel)?;
        check_positive("strides", &self.strides)?;
        let [ph0, ph1, pw0, pw1] = self.pads;
        let [hk, wk] = self.kernel;
        // 填充不能覆盖整个窗口
        if ph0.max(ph1) >= hk || pw0.max(pw1) >= wk {
            return Err(bad_parameter(format!(
                "pads {:?} too large for kernel {:?}",
                self.pads, self.kernel
            )));
        }
        Ok(())
    }

    /// 输入 `[h, w]` 时输出的 `[hy, wy]`。
    #[inline]
    pub fn output_dim(&self, input: [usize; 2]) -> Result<[usize; 2], Error> {
        self.check()?;
        window_output(input, self.kernel, self.strides, [1; 2], self.pads)
    }
}

config!(PoolingDesc: Pooling);

#[cfg(test)]
mod test {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_output_dim() {
        let mut pool = PoolingDesc::default();
        assert_eq!(pool.output_dim([7, 9]).unwrap(), [7, 9]);

        pool.set(PoolingDesc {
            mode: PoolingMode::AverageExcludePad,
            kernel: [3, 3],
            strides: [2, 2],
            pads: [1, 1, 1, 1],
        })
        .unwrap();
        assert_eq!(pool.output_dim([8, 7]).unwrap(), [4, 4]);
        assert_eq!(pool.get().mode, PoolingMode::AverageExcludePad);
    }

    #[test]
    fn test_output_dim_unchecked() {
        for pool in [
            PoolingDesc {
                kernel: [0, 1],
                ..PoolingDesc::EMPTY
            },
            PoolingDesc {
                strides: [1, 0],
                ..PoolingDesc::EMPTY
            },
            PoolingDesc {
                kernel: [2, 2],
                pads: [2, 0, 0, 0],
                ..PoolingDesc::EMPTY
            },
        ] {
            assert_eq!(
                pool.output_dim([4, 4]).err().map(|e| e.kind),
                Some(ErrorKind::BadParameter)
            );
        }
        let pool = PoolingDesc {
            kernel: [2, 2],
            pads: [1, 1, 1, 1],
            ..PoolingDesc::EMPTY
        };
        assert!(pool.output_dim([usize::MAX, 4]).is_err());
        assert_eq!(pool.output_dim([4, 4]).unwrap(), [5, 5]);
    }

    #[test]
    fn test_set() {
        let mut pool = PoolingDesc::default();
        for bad in [
            PoolingDesc {
                kernel: [0, 2],
                ..PoolingDesc::EMPTY
            },
            PoolingDesc {
                strides: [2, 0],
                ..PoolingDesc::EMPTY
            },
            PoolingDesc {
                kernel: [2, 2],
                pads: [0, 2, 0, 0],
                ..PoolingDesc::EMPTY
            },
        ] {
            assert_eq!(
                pool.set(bad).err().map(|e| e.kind),
                Some(ErrorKind::BadParameter)
            );
        }
        assert_eq!(pool, PoolingDesc::EMPTY);
    }
}
