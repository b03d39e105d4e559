use crate::error::SolverError;

// 射影ニュートン法による箱型制約付き二次計画
//   min 1/2 x^T H x + q^T x  s.t. lower <= x <= upper
// iLQR の後退パスで各時刻の入力を求めるのに使う

#[derive(Debug, Clone)]
pub struct BoxQp<const C: usize> {
    pub x: na::SVector<f64, C>,
    /// 制約が効いていない次元
    pub free: [bool; C],
    pub iterations: usize,
}

const GAMMA: f64 = 0.1;
const STEP_DECAY: f64 = 0.5;
const MAX_STEP_ITER: usize = 10;
const TOL: f64 = 1e-8;

fn objective<const C: usize>(
    h: &na::SMatrix<f64, C, C>,
    q: &na::SVector<f64, C>,
    x: &na::SVector<f64, C>,
) -> f64 {
    0.5 * x.dot(&(h * x)) + q.dot(x)
}

fn clamp<const C: usize>(
    x: &na::SVector<f64, C>,
    lower: &na::SVector<f64, C>,
    upper: &na::SVector<f64, C>,
) -> na::SVector<f64, C> {
    x.zip_zip_map(lower, upper, |e, l, u| e.clamp(l, u))
}

// 境界に張り付き, かつ勾配が外向きの次元は固定
fn free_set<const C: usize>(
    h: &na::SMatrix<f64, C, C>,
    q: &na::SVector<f64, C>,
    x: &na::SVector<f64, C>,
    lower: &na::SVector<f64, C>,
    upper: &na::SVector<f64, C>,
) -> [bool; C] {
    let g = h * x + q;
    let mut free = [true; C];
    for j in 0..C {
        let at_lower = x[j] <= lower[j] && g[j] > 0.0;
        let at_upper = x[j] >= upper[j] && g[j] < 0.0;
        free[j] = !(at_lower || at_upper);
    }
    free
}

pub fn pnqp<const C: usize>(
    h: &na::SMatrix<f64, C, C>,
    q: &na::SVector<f64, C>,
    lower: &na::SVector<f64, C>,
    upper: &na::SVector<f64, C>,
    x0: &na::SVector<f64, C>,
    max_iter: usize,
) -> Result<BoxQp<C>, SolverError> {
    let mut x = clamp(x0, lower, upper);

    for i in 0..max_iter {
        let g = h * x + q;
        let free = free_set(h, q, &x, lower, upper);
        if free.iter().all(|f| !f) {
            return Ok(BoxQp {
                x,
                free,
                iterations: i,
            });
        }

        let dx = -free_solve(h, &free, &g)?;
        if dx.norm() < TOL {
            return Ok(BoxQp {
                x,
                free,
                iterations: i,
            });
        }

        // Armijo 条件による直線探索
        let f = objective(h, q, &x);
        let mut alpha = 1.0;
        let mut x_next = clamp(&(x + alpha * dx), lower, upper);
        for _ in 0..MAX_STEP_ITER {
            if objective(h, q, &x_next) <= f + GAMMA * g.dot(&(x_next - x)) {
                break;
            }
            alpha *= STEP_DECAY;
            x_next = clamp(&(x + alpha * dx), lower, upper);
        }
        if (x_next - x).norm() < TOL {
            return Ok(BoxQp {
                free: free_set(h, q, &x_next, lower, upper),
                x: x_next,
                iterations: i + 1,
            });
        }
        x = x_next;
    }

    // 返す x での制約状態
    Ok(BoxQp {
        free: free_set(h, q, &x, lower, upper),
        x,
        iterations: max_iter,
    })
}

// H_ff^{-1} rhs_f を求める. 固定された行は 0
pub fn free_solve<const C: usize, const K: usize>(
    h: &na::SMatrix<f64, C, C>,
    free: &[bool; C],
    rhs: &na::SMatrix<f64, C, K>,
) -> Result<na::SMatrix<f64, C, K>, SolverError> {
    let idx: Vec<usize> = (0..C).filter(|&i| free[i]).collect();
    let mut out = na::SMatrix::<f64, C, K>::zeros();
    if idx.is_empty() {
        return Ok(out);
    }
    let n = idx.len();
    let h_ff = na::DMatrix::from_fn(n, n, |r, c| h[(idx[r], idx[c])]);
    let rhs_f = na::DMatrix::from_fn(n, K, |r, c| rhs[(idx[r], c)]);
    let chol = h_ff.cholesky().ok_or(SolverError::Factorization(0))?;
    let sol = chol.solve(&rhs_f);
    for (r, &i) in idx.iter().enumerate() {
        for c in 0..K {
            out[(i, c)] = sol[(r, c)];
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use na::{matrix, vector};

    fn bounds() -> (na::Vector2<f64>, na::Vector2<f64>) {
        (vector![-1.0, -1.0], vector![1.0, 1.0])
    }

    #[test]
    fn interior_minimum_is_unconstrained_solution() {
        let h = matrix![2.0, 0.5; 0.5, 1.0];
        let q = vector![-0.5, 0.2];
        let (l, u) = bounds();
        let qp = pnqp(&h, &q, &l, &u, &na::Vector2::zeros(), 20).unwrap();
        let expected = -h.try_inverse().unwrap() * q;
        assert_relative_eq!(qp.x, expected, epsilon = 1e-8);
        assert_eq!(qp.free, [true, true]);
    }

    #[test]
    fn active_bound_is_clamped() {
        // 制約なしの最適解は (3, 0.25)
        let h = matrix![1.0, 0.0; 0.0, 2.0];
        let q = vector![-3.0, -0.5];
        let (l, u) = bounds();
        let qp = pnqp(&h, &q, &l, &u, &na::Vector2::zeros(), 20).unwrap();
        assert_relative_eq!(qp.x, vector![1.0, 0.25], epsilon = 1e-8);
        assert_eq!(qp.free, [false, true]);
    }

    #[test]
    fn coupled_problem_stays_feasible() {
        let h = matrix![1.0, 0.9; 0.9, 1.0];
        let q = vector![5.0, -5.0];
        let (l, u) = bounds();
        let qp = pnqp(&h, &q, &l, &u, &vector![0.3, 0.3], 20).unwrap();
        assert_relative_eq!(qp.x, vector![-1.0, 1.0], epsilon = 1e-8);
        assert_eq!(qp.free, [false, false]);
    }

    #[test]
    fn iteration_limit_reports_free_set_of_returned_point() {
        // 1回の反復で (1, 0.5) に到達し, 0 次元目は上限で外向きの勾配
        let h = na::Matrix2::identity();
        let q = vector![-3.0, -0.5];
        let (l, u) = bounds();
        let qp = pnqp(&h, &q, &l, &u, &na::Vector2::zeros(), 1).unwrap();
        assert_relative_eq!(qp.x, vector![1.0, 0.5], epsilon = 1e-12);
        assert_eq!(qp.free, [false, true]);
        assert_eq!(qp.iterations, 1);
    }

    #[test]
    fn zero_iterations_still_classify_start() {
        let h = na::Matrix2::identity();
        let q = vector![-3.0, 3.0];
        let (l, u) = bounds();
        let qp = pnqp(&h, &q, &l, &u, &vector![5.0, -5.0], 0).unwrap();
        assert_eq!(qp.x, vector![1.0, -1.0]);
        assert_eq!(qp.free, [false, false]);
    }

    #[test]
    fn free_solve_zeroes_clamped_rows() {
        let h = matrix![2.0, 0.0; 0.0, 4.0];
        let rhs = matrix![2.0, 4.0; 8.0, 4.0];
        let sol = free_solve(&h, &[false, true], &rhs).unwrap();
        assert_relative_eq!(sol, matrix![0.0, 0.0; 2.0, 1.0], epsilon = 1e-12);
    }

    #[test]
    fn indefinite_block_is_an_error() {
        let h = matrix![-1.0, 0.0; 0.0, 1.0];
        let rhs = na::Vector2::new(1.0, 1.0);
        assert!(free_solve(&h, &[true, true], &rhs).is_err());
    }
}
