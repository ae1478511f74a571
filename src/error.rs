use thiserror::Error;

use crate::state::Field;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("output error")]
    Io(#[from] std::io::Error),

    #[error("structural error: {0}")]
    Structure(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("time step is probably getting too small: dt={dt:e} (max edge cfl {max_cfl:e})")]
    StepTooSmall { dt: f64, max_cfl: f64 },

    #[error("negative water height {value:e} at dof {dof}")]
    NegativeHeight { dof: usize, value: f64 },

    #[error("limited {field} at dof {dof} left its admissible set ({value:e})")]
    BoundViolation { dof: usize, field: Field, value: f64 },
}

impl SimError {
    pub(crate) fn structure(msg: impl Into<String>) -> Self {
        Self::Structure(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
