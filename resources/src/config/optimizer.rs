use crate::{bad_parameter, Error};
use std::ops::RangeInclusive;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Algorithm {
    Sgd,
    Adam,
    AdamW,
    RmsProp,
}

/// 优化器超参数。
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct OptimizerDesc {
    pub algorithm: Algorithm,
    pub learning_rate: f32,
    pub momentum: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    pub weight_decay: f32,
    pub nesterov: bool,
}

impl OptimizerDesc {
    pub const EMPTY: Self = Self {
        algorithm: Algorithm::Sgd,
        learning_rate: 1e-3,
        momentum: 0.,
        beta1: 0.9,
        beta2: 0.999,
        epsilon: 1e-8,
        weight_decay: 0.,
        nesterov: false,
    };

    fn check(&self) -> Result<(), Error> {
        fn within(name: &str, value: f32, range: RangeInclusive<f32>) -> Result<(), Error> {
            if range.contains(&value) {
                Ok(())
            } else {
                Err(bad_parameter(format!("{name} {value} not in {range:?}")))
            }
        }

        if !(self.learning_rate.is_finite() && self.learning_rate > 0.) {
            return Err(bad_parameter(format!(
                "learning rate {} must be positive",
                self.learning_rate
            )));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.) {
            return Err(bad_parameter(format!(
                "epsilon {} must be positive",
                self.epsilon
            )));
        }
        within("momentum", self.momentum, 0. ..=1.)?;
        within("beta1", self.beta1, 0. ..=1.)?;
        within("beta2", self.beta2, 0. ..=1.)?;
        within("weight decay", self.weight_decay, 0. ..=f32::MAX)?;
        if self.nesterov && (self.algorithm != Algorithm::Sgd || self.momentum == 0.) {
            return Err(bad_parameter("nesterov requires sgd with momentum"));
        }
        Ok(())
    }
}

config!(OptimizerDesc: Optimizer);
