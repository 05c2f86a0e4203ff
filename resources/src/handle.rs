use std::fmt;

/// 设备类型，占句柄最高字节。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum DeviceType {
    Cpu = 1,
    Cuda = 2,
    OpenCl = 3,
    Reference = 4,
}

/// 对象种类，占句柄次高字节。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum ObjectKind {
    Memory = 1,
    Context = 2,
    Tensor = 3,
    Convolution = 4,
    Pooling = 5,
    Optimizer = 6,
    Dropout = 7,
}

impl DeviceType {
    #[inline]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            1 => Some(Self::Cpu),
            2 => Some(Self::Cuda),
            3 => Some(Self::OpenCl),
            4 => Some(Self::Reference),
            _ => None,
        }
    }
}

impl ObjectKind {
    #[inline]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            1 => Some(Self::Memory),
            2 => Some(Self::Context),
            3 => Some(Self::Tensor),
            4 => Some(Self::Convolution),
            5 => Some(Self::Pooling),
            6 => Some(Self::Optimizer),
            7 => Some(Self::Dropout),
            _ => None,
        }
    }
}

/// 资源句柄。
///
/// | bits   | field       |
/// |:------:|:-----------:|
/// | 56..64 | device type |
/// | 48..56 | object kind |
/// | 32..48 | device      |
/// |  0..32 | slot        |
///
/// 任意 64 位整数都是语法上合法的句柄，语义检查由对象池完成。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct Handle(i64);

const TYPE_SHIFT: u32 = 56;
const KIND_SHIFT: u32 = 48;
const DEVICE_SHIFT: u32 = 32;
const BYTE_MASK: u64 = 0xff;
const DEVICE_MASK: u64 = 0xffff;
const SLOT_MASK: u64 = 0xffff_ffff;

impl Handle {
    /// 空句柄，总是解析为对应种类的静态空对象。
    pub const NULL: Self = Self(0);

    pub const fn encode(device_type: u8, device: u16, kind: u8, slot: u32) -> Self {
        let bits = (device_type as u64) << TYPE_SHIFT
            | (kind as u64) << KIND_SHIFT
            | (device as u64) << DEVICE_SHIFT
            | slot as u64;
        Self(bits as i64)
    }

    #[inline]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL.0
    }

    #[inline]
    pub const fn device_type_bits(self) -> u8 {
        (self.bits() >> TYPE_SHIFT & BYTE_MASK) as _
    }

    #[inline]
    pub const fn kind_bits(self) -> u8 {
        (self.bits() >> KIND_SHIFT & BYTE_MASK) as _
    }

    #[inline]
    pub const fn device(self) -> u16 {
        (self.bits() >> DEVICE_SHIFT & DEVICE_MASK) as _
    }

    #[inline]
    pub const fn slot(self) -> u32 {
        (self.bits() & SLOT_MASK) as _
    }

    #[inline]
    pub const fn device_type(self) -> Option<DeviceType> {
        DeviceType::from_bits(self.device_type_bits())
    }

    #[inline]
    pub const fn kind(self) -> Option<ObjectKind> {
        ObjectKind::from_bits(self.kind_bits())
    }

    #[inline]
    const fn bits(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_null() {
            return write!(f, "Handle(null)");
        }
        write!(
            f,
            "Handle({:#04x}:{:#04x}:{}:{})",
            self.device_type_bits(),
            self.kind_bits(),
            self.device(),
            self.slot(),
        )
    }
}
