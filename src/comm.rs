use crate::state::DofState;

/// Synchronization points of a distributed run.
///
/// Ghost DOFs are refreshed from their owners with the scatter methods;
/// reductions are blocking and return the same value on every rank.
pub trait Communicator {
    fn all_reduce_max(&self, local: f64) -> f64;
    fn all_reduce_min(&self, local: f64) -> f64;
    fn all_reduce_sum(&self, local: f64) -> f64;

    fn scatter_forward(&self, values: &mut [f64]);
    fn scatter_forward_state(&self, state: &mut DofState);
}

/// Single-process communicator: reductions are the identity, there are no ghosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct Serial;

impl Communicator for Serial {
    fn all_reduce_max(&self, local: f64) -> f64 {
        local
    }

    fn all_reduce_min(&self, local: f64) -> f64 {
        local
    }

    fn all_reduce_sum(&self, local: f64) -> f64 {
        local
    }

    fn scatter_forward(&self, _values: &mut [f64]) {}

    fn scatter_forward_state(&self, _state: &mut DofState) {}
}
