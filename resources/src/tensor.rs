use crate::{
    bad_parameter, rank_not_support,
    registry::{Create, Registry},
    Error, Object, ObjectKind,
};
use digit_layout::DigitLayout;
use std::fmt;

/// 张量描述符支持的最大阶数。
pub const MAX_RANK: usize = 8;

/// 张量描述符。
///
/// 只记录数据类型和形状，步长以元素为单位，按行优先在每次 [TensorDesc::set] 时重算。
#[derive(Clone, Default)]
pub struct TensorDesc {
    dt: Option<DigitLayout>,
    rank: usize,
    dims: [usize; MAX_RANK],
    strides: [isize; MAX_RANK],
}

/// 张量描述符的构造参数。
#[derive(Clone, Copy)]
pub struct Shape<'a> {
    pub dt: DigitLayout,
    pub dims: &'a [usize],
}

impl TensorDesc {
    pub const EMPTY: Self = Self {
        dt: None,
        rank: 0,
        dims: [0; MAX_RANK],
        strides: [0; MAX_RANK],
    };

    /// 设置类型和形状并重算步长。元素数或字节数超出 `isize` 时报错，描述符不变。
    pub fn set(&mut self, dt: DigitLayout, dims: &[usize]) -> Result<(), Error> {
        if dims.len() > MAX_RANK {
            return Err(rank_not_support(format!(
                "rank {} exceeds {MAX_RANK}",
                dims.len()
            )));
        }
        let overflow = || bad_parameter(format!("shape {dims:?} of {dt} overflows"));

        let mut strides = [0; MAX_RANK];
        let mut mul = 1isize;
        for (dst, &d) in strides[..dims.len()].iter_mut().zip(dims).rev() {
            *dst = mul;
            mul = isize::try_from(d)
                .ok()
                .and_then(|d| mul.checked_mul(d))
                .ok_or_else(overflow)?;
        }
        if let Some(unit) = dt.nbytes() {
            isize::try_from(unit)
                .ok()
                .and_then(|unit| mul.checked_mul(unit))
                .ok_or_else(overflow)?;
        }

        *self = Self::EMPTY;
        self.dt = Some(dt);
        self.rank = dims.len();
        self.dims[..dims.len()].copy_from_slice(dims);
        self.strides = strides;
        Ok(())
    }

    /// 按需取出数据类型、阶数和形状。`dims` 的长度必须不小于阶数。
    pub fn get(
        &self,
        dt: Option<&mut Option<DigitLayout>>,
        rank: Option<&mut usize>,
        dims: Option<&mut [usize]>,
    ) -> Result<(), Error> {
        if let Some(dims) = dims {
            let len = dims.len();
            let Some(dst) = dims.get_mut(..self.rank) else {
                return Err(bad_parameter(format!(
                    "{len} dims can't hold rank {}",
                    self.rank
                )));
            };
            dst.copy_from_slice(self.dims());
        }
        if let Some(dt) = dt {
            *dt = self.dt
        }
        if let Some(rank) = rank {
            *rank = self.rank
        }
        Ok(())
    }

    #[inline]
    pub fn dt(&self) -> Option<DigitLayout> {
        self.dt
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.dims[..self.rank]
    }

    #[inline]
    pub fn strides(&self) -> &[isize] {
        &self.strides[..self.rank]
    }

    /// 元素总数，0 阶张量为 0。
    pub fn volume(&self) -> usize {
        if self.rank == 0 {
            0
        } else {
            self.dims().iter().product()
        }
    }

    #[inline]
    pub fn first_dim(&self) -> usize {
        self.dims().first().copied().unwrap_or(0)
    }

    #[inline]
    pub fn last_dim(&self) -> usize {
        self.dims().last().copied().unwrap_or(0)
    }

    pub fn volume_without_first_dim(&self) -> usize {
        match self.dims() {
            [] => 0,
            [_, tail @ ..] => tail.iter().product(),
        }
    }

    pub fn volume_without_last_dim(&self) -> usize {
        match self.dims() {
            [] => 0,
            [head @ .., _] => head.iter().product(),
        }
    }

    /// 数据占用的字节数，未设置类型或类型不按整字节存储时为 0。
    pub fn size_in_bytes(&self) -> usize {
        self.dt
            .and_then(DigitLayout::nbytes)
            .map_or(0, |unit| self.volume() * unit)
    }

    /// 多维下标 -> 线性元素下标。
    pub fn index(&self, indices: &[usize]) -> Result<usize, Error> {
        if indices.len() != self.rank {
            return Err(bad_parameter(format!(
                "{} indices for rank {}",
                indices.len(),
                self.rank
            )));
        }
        indices
            .iter()
            .zip(self.dims())
            .zip(self.strides())
            .try_fold(0, |acc, ((&i, &d), &s)| {
                if i < d {
                    Ok(acc + i * s as usize)
                } else {
                    Err(bad_parameter(format!("index {i} out of dim {d}")))
                }
            })
    }

    /// 阶数和各维长度都相同。
    #[inline]
    pub fn equal_shape(&self, other: &Self) -> bool {
        self.dims() == other.dims()
    }
}

impl Object for TensorDesc {
    const KIND: ObjectKind = ObjectKind::Tensor;

    #[inline]
    fn null() -> &'static Self {
        static NULL: TensorDesc = TensorDesc::EMPTY;
        &NULL
    }

    #[inline]
    fn destroy(&mut self) -> Result<(), Error> {
        *self = Self::EMPTY;
        Ok(())
    }
}

impl<'a> Create<Shape<'a>> for TensorDesc {
    #[inline]
    fn create(&mut self, _: &Registry, Shape { dt, dims }: Shape<'a>) -> Result<(), Error> {
        self.set(dt, dims)
    }
}

/// 只有阶数为 0 的空描述符。
impl Create<()> for TensorDesc {
    #[inline]
    fn create(&mut self, _: &Registry, (): ()) -> Result<(), Error> {
        *self = Self::EMPTY;
        Ok(())
    }
}

impl fmt::Debug for TensorDesc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.dt {
            Some(dt) => write!(f, "Tensor<{dt}>{:?}", self.dims()),
            None => write!(f, "Tensor<?>{:?}", self.dims()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ErrorKind;
    use digit_layout::types as ty;

    #[test]
    fn test_f32_234() {
        let mut t = TensorDesc::default();
        t.set(ty::F32, &[2, 3, 4]).unwrap();
        assert_eq!(t.rank(), 3);
        assert_eq!(t.dims(), [2, 3, 4]);
        assert_eq!(t.strides(), [12, 4, 1]);
        assert_eq!(t.volume(), 24);
        assert_eq!(t.size_in_bytes(), 96);
        assert_eq!(t.first_dim(), 2);
        assert_eq!(t.last_dim(), 4);
        assert_eq!(t.volume_without_first_dim(), 12);
        assert_eq!(t.volume_without_last_dim(), 6);
        assert_eq!(t.index(&[1, 2, 3]).unwrap(), 23);
        assert_eq!(t.index(&[0, 0, 0]).unwrap(), 0);
        assert_eq!(
            t.index(&[0, 3, 0]).err().map(|e| e.kind),
            Some(ErrorKind::BadParameter)
        );
        assert!(t.index(&[0, 0]).is_err());
    }

    #[test]
    fn test_set_again() {
        let mut t = TensorDesc::default();
        t.set(ty::F16, &[5, 6, 7, 8]).unwrap();
        t.set(ty::F16, &[3, 5]).unwrap();
        assert_eq!(t.dims(), [3, 5]);
        assert_eq!(t.strides(), [5, 1]);
        assert_eq!(t.size_in_bytes(), 30);

        let mut dt = None;
        let mut rank = 0;
        let mut dims = [0; MAX_RANK];
        t.get(Some(&mut dt), Some(&mut rank), Some(&mut dims[..]))
            .unwrap();
        assert!(dt == Some(ty::F16));
        assert_eq!(rank, 2);
        assert_eq!(dims[..2], [3, 5]);
        t.get(None, None, None).unwrap();
        assert_eq!(
            t.get(None, None, Some(&mut [0; 1][..])).err().map(|e| e.kind),
            Some(ErrorKind::BadParameter)
        );
    }

    #[test]
    fn test_rank() {
        let mut t = TensorDesc::default();
        assert_eq!(t.volume(), 0);
        assert_eq!(t.size_in_bytes(), 0);
        assert_eq!(t.first_dim(), 0);
        assert_eq!(t.volume_without_last_dim(), 0);

        t.set(ty::U8, &[1; MAX_RANK]).unwrap();
        assert_eq!(t.volume(), 1);
        assert_eq!(
            t.set(ty::U8, &[1; MAX_RANK + 1]).err().map(|e| e.kind),
            Some(ErrorKind::RankNotSupport)
        );
        assert_eq!(t.rank(), MAX_RANK);

        t.set(ty::I32, &[]).unwrap();
        assert_eq!(t.volume(), 0);
        assert_eq!(t.index(&[]).unwrap(), 0);
        t.destroy().unwrap();
        assert!(t.dt().is_none());
    }

    #[test]
    fn test_overflow() {
        let mut t = TensorDesc::default();
        t.set(ty::F32, &[2, 3, 4]).unwrap();
        for dims in [
            &[1 << 40, 1 << 40][..],
            &[usize::MAX],
            &[0, 1 << 40, 1 << 40],
            // 元素数可以表示，字节数不能
            &[1 << 31, 1 << 31],
        ] {
            assert_eq!(
                t.set(ty::F32, dims).err().map(|e| e.kind),
                Some(ErrorKind::BadParameter)
            );
            assert_eq!(t.dims(), [2, 3, 4]);
            assert_eq!(t.strides(), [12, 4, 1]);
            assert!(t.dt() == Some(ty::F32));
        }
        t.set(ty::U8, &[1 << 31, 1 << 31]).unwrap();
        assert_eq!(t.strides(), [1 << 31, 1]);
        assert_eq!(t.size_in_bytes(), 1 << 62);
    }

    #[test]
    fn test_unsized_type() {
        let mut t = TensorDesc::default();
        assert!(ty::Bool.nbytes().is_none());
        t.set(ty::Bool, &[2, 3]).unwrap();
        assert_eq!(t.volume(), 6);
        assert_eq!(t.strides(), [3, 1]);
        assert_eq!(t.size_in_bytes(), 0);
    }

    #[test]
    fn test_equal_shape() {
        let mut a = TensorDesc::default();
        let mut b = TensorDesc::default();
        a.set(ty::F32, &[2, 3]).unwrap();
        b.set(ty::F64, &[2, 3]).unwrap();
        assert!(a.equal_shape(&b));
        b.set(ty::F64, &[2, 3, 1]).unwrap();
        assert!(!a.equal_shape(&b));
        b.set(ty::F64, &[3, 2]).unwrap();
        assert!(!a.equal_shape(&b));
    }
}
