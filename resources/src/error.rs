use std::{error, fmt};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ErrorKind {
    InvalidHandle,
    BadParameter,
    AllocFailed,
    FreeFailed,
    ViewOutOfRange,
    ViewOfView,
    RankNotSupport,
    Internal,
}

#[derive(Clone, Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub info: String,
}

impl fmt::Display for Error {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.info)
    }
}

impl error::Error for Error {}

/// 句柄层对外的状态码。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(i32)]
pub enum Status {
    Success = 0,
    BadParameter = 1,
    AllocFailed = 2,
    FreeFailed = 3,
    InternalError = 4,
}

impl From<ErrorKind> for Status {
    fn from(kind: ErrorKind) -> Self {
        use ErrorKind::*;
        match kind {
            InvalidHandle | BadParameter | ViewOutOfRange | ViewOfView | RankNotSupport => {
                Self::BadParameter
            }
            AllocFailed => Self::AllocFailed,
            FreeFailed => Self::FreeFailed,
            Internal => Self::InternalError,
        }
    }
}

impl<T> From<&Result<T, Error>> for Status {
    #[inline]
    fn from(result: &Result<T, Error>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => e.kind.into(),
        }
    }
}

impl Status {
    #[inline]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

pub(super) mod functions {
    use super::{Error, ErrorKind::*};

    macro_rules! builder {
        ($ty:ident: $name:ident $kind:expr) => {
            #[inline]
            pub fn $name(info: impl Into<String>) -> $ty {
                $ty {
                    kind: $kind,
                    info: info.into(),
                }
            }
        };
    }

    builder!(Error: invalid_handle    InvalidHandle );
    builder!(Error: bad_parameter     BadParameter  );
    builder!(Error: alloc_failed      AllocFailed   );
    builder!(Error: free_failed       FreeFailed    );
    builder!(Error: view_out_of_range ViewOutOfRange);
    builder!(Error: view_of_view      ViewOfView    );
    builder!(Error: rank_not_support  RankNotSupport);

    builder!(Error: internal          Internal      );
}

#[test]
fn test_status() {
    use functions::*;

    assert_eq!(Status::from(invalid_handle("").kind), Status::BadParameter);
    assert_eq!(Status::from(view_of_view("").kind), Status::BadParameter);
    assert_eq!(Status::from(alloc_failed("").kind), Status::AllocFailed);
    assert_eq!(Status::from(free_failed("").kind), Status::FreeFailed);
    assert_eq!(Status::from(internal("").kind), Status::InternalError);
    assert_eq!(Status::from(&Ok::<_, Error>(())), Status::Success);

    let e = rank_not_support("rank = 9");
    assert_eq!(e.to_string(), "RankNotSupport: rank = 9");
}
