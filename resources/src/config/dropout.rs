use crate::{bad_parameter, Error};

/// 随机失活配置。
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct DropoutDesc {
    /// 丢弃概率，`[0, 1)`
    pub probability: f32,
    pub seed: u64,
}

impl DropoutDesc {
    pub const EMPTY: Self = Self {
        probability: 0.,
        seed: 0,
    };

    fn check(&self) -> Result<(), Error> {
        if (0. ..1.).contains(&self.probability) {
            Ok(())
        } else {
            Err(bad_parameter(format!(
                "dropout probability {} not in [0, 1)",
                self.probability
            )))
        }
    }

    /// 保留元素的缩放系数。
    #[inline]
    pub fn scale(&self) -> f32 {
        1. / (1. - self.probability)
    }
}

config!(DropoutDesc: Dropout);

#[test]
fn test_dropout() {
    use crate::ErrorKind;

    let mut dropout = DropoutDesc::default();
    assert_eq!(dropout.scale(), 1.);
    dropout
        .set(DropoutDesc {
            probability: 0.5,
            seed: 42,
        })
        .unwrap();
    assert_eq!(dropout.scale(), 2.);
    assert_eq!(dropout.get().seed, 42);

    for p in [1., -0.1, f32::NAN] {
        assert_eq!(
            dropout
                .set(DropoutDesc {
                    probability: p,
                    seed: 0
                })
                .err()
                .map(|e| e.kind),
            Some(ErrorKind::BadParameter)
        );
    }
    assert_eq!(dropout.probability, 0.5);
}
