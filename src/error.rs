use thiserror::Error;

#[derive(Debug, Error)]
pub enum SolverError {
    /// `exit_unconverged` が有効で、反復上限までに収束しなかった
    #[error("iLQR did not converge after {iterations} iterations (max |du| = {max_du:.3e})")]
    NotConverged { iterations: usize, max_du: f64 },

    #[error("prediction horizon must be at least 1")]
    EmptyHorizon,

    #[error("non-finite value in {0}")]
    NonFinite(&'static str),

    #[error("Hessian block is not positive definite at horizon step {0}")]
    Factorization(usize),
}
