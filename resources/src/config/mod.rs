//! 算子配置描述符。
//!
//! 都是不持有动态资源的值类型，空状态即各自的默认配置。

macro_rules! config {
    ($ty:ident: $kind:ident) => {
        impl $ty {
            /// 校验后整体替换，校验失败时不改变描述符。
            pub fn set(&mut self, desc: Self) -> Result<(), crate::Error> {
                desc.check()?;
                *self = desc;
                Ok(())
            }

            #[inline]
            pub fn get(&self) -> Self {
                *self
            }
        }

        impl Default for $ty {
            #[inline]
            fn default() -> Self {
                Self::EMPTY
            }
        }

        impl crate::Object for $ty {
            const KIND: crate::ObjectKind = crate::ObjectKind::$kind;

            #[inline]
            fn null() -> &'static Self {
                static NULL: $ty = $ty::EMPTY;
                &NULL
            }

            #[inline]
            fn destroy(&mut self) -> Result<(), crate::Error> {
                *self = Self::EMPTY;
                Ok(())
            }
        }

        impl crate::registry::Create<()> for $ty {
            #[inline]
            fn create(&mut self, _: &crate::Registry, (): ()) -> Result<(), crate::Error> {
                *self = Self::EMPTY;
                Ok(())
            }
        }

        impl crate::registry::Create<$ty> for $ty {
            #[inline]
            fn create(&mut self, _: &crate::Registry, desc: Self) -> Result<(), crate::Error> {
                self.set(desc)
            }
        }
    };
}

mod conv;
mod dropout;
mod optimizer;
mod pooling;

pub use conv::ConvDesc;
pub use dropout::DropoutDesc;
pub use optimizer::{Algorithm, OptimizerDesc};
pub use pooling::{PoolingDesc, PoolingMode};

use crate::{bad_parameter, Error};

/// 二维窗口滑动后的输出长度。
///
/// `pads` 依次为上、下、左、右。
fn window_output(
    input: [usize; 2],
    kernel: [usize; 2],
    strides: [usize; 2],
    dilations: [usize; 2],
    pads: [usize; 4],
) -> Result<[usize; 2], Error> {
    check_positive("kernel", &kernel)?;
    check_positive("strides", &strides)?;
    check_positive("dilations", &dilations)?;
    let [ph0, ph1, pw0, pw1] = pads;
    let overflow = || bad_parameter(format!("window of {kernel:?} over {input:?} overflows"));
    let mut ans = [0; 2];
    for (i, [p0, p1]) in [[ph0, ph1], [pw0, pw1]].into_iter().enumerate() {
        let padded = input[i]
            .checked_add(p0)
            .and_then(|n| n.checked_add(p1))
            .ok_or_else(overflow)?;
        let window = dilations[i]
            .checked_mul(kernel[i] - 1)
            .and_then(|n| n.checked_add(1))
            .ok_or_else(overflow)?;
        if window > padded {
            return Err(bad_parameter(format!(
                "window {window} exceeds padded input {padded}"
            )));
        }
        ans[i] = (padded - window) / strides[i] + 1
    }
    Ok(ans)
}

/// 窗口参数全部为正数。
fn check_positive(name: &str, values: &[usize]) -> Result<(), Error> {
    if values.iter().all(|&v| v > 0) {
        Ok(())
    } else {
        Err(bad_parameter(format!("{name} must be positive, got {values:?}")))
    }
}
