/// 線形化の方法
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GradMethod {
    /// モデルが提供する解析的ヤコビアンを使う
    #[default]
    Analytic,
    /// 中心差分による数値微分
    FiniteDiff,
}

// 離散時間の系ダイナミクス x_{t+1} = f(x_t, u_t)
pub trait Dynamics<const S: usize, const C: usize>: Sync {
    fn step(&self, x: &na::SVector<f64, S>, u: &na::SVector<f64, C>) -> na::SVector<f64, S>;

    // (∂f/∂x, ∂f/∂u)
    // 既定は数値微分. 解析解があるモデルは上書きする
    fn jacobians(
        &self,
        x: &na::SVector<f64, S>,
        u: &na::SVector<f64, C>,
    ) -> (na::SMatrix<f64, S, S>, na::SMatrix<f64, S, C>) {
        finite_difference(self, x, u, 1e-6)
    }

    fn lower(&self) -> na::SVector<f64, C>;
    fn upper(&self) -> na::SVector<f64, C>;

    fn linesearch_decay(&self) -> f64 {
        0.2
    }

    fn max_linesearch_iter(&self) -> usize {
        10
    }

    fn linearize(
        &self,
        x: &na::SVector<f64, S>,
        u: &na::SVector<f64, C>,
        method: GradMethod,
    ) -> (na::SMatrix<f64, S, S>, na::SMatrix<f64, S, C>) {
        match method {
            GradMethod::Analytic => self.jacobians(x, u),
            GradMethod::FiniteDiff => finite_difference(self, x, u, 1e-6),
        }
    }
}

// 中心差分でヤコビアンを求める
pub fn finite_difference<D, const S: usize, const C: usize>(
    dx: &D,
    x: &na::SVector<f64, S>,
    u: &na::SVector<f64, C>,
    eps: f64,
) -> (na::SMatrix<f64, S, S>, na::SMatrix<f64, S, C>)
where
    D: Dynamics<S, C> + ?Sized,
{
    let mut a = na::SMatrix::<f64, S, S>::zeros();
    for i in 0..S {
        let mut x_p = *x;
        let mut x_n = *x;
        x_p[i] += eps;
        x_n[i] -= eps;
        let col = (dx.step(&x_p, u) - dx.step(&x_n, u)) / (2.0 * eps);
        a.set_column(i, &col);
    }
    let mut b = na::SMatrix::<f64, S, C>::zeros();
    for i in 0..C {
        let mut u_p = *u;
        let mut u_n = *u;
        u_p[i] += eps;
        u_n[i] -= eps;
        let col = (dx.step(x, &u_p) - dx.step(x, &u_n)) / (2.0 * eps);
        b.set_column(i, &col);
    }
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use na::{matrix, vector};

    // x' = A x + B u の線形系
    struct Linear;

    impl Dynamics<2, 1> for Linear {
        fn step(&self, x: &na::Vector2<f64>, u: &na::Vector1<f64>) -> na::Vector2<f64> {
            matrix![1.0, 0.1; 0.0, 1.0] * x + vector![0.0, 0.1] * u[0]
        }
        fn lower(&self) -> na::Vector1<f64> {
            vector![-1.0]
        }
        fn upper(&self) -> na::Vector1<f64> {
            vector![1.0]
        }
    }

    #[test]
    fn finite_difference_recovers_linear_system() {
        let (a, b) = Linear.jacobians(&vector![0.3, -2.0], &vector![0.5]);
        assert_relative_eq!(a, matrix![1.0, 0.1; 0.0, 1.0], epsilon = 1e-8);
        assert_relative_eq!(b, matrix![0.0; 0.1], epsilon = 1e-8);
    }

    #[test]
    fn default_solver_hints() {
        assert_eq!(Linear.linesearch_decay(), 0.2);
        assert_eq!(Linear.max_linesearch_iter(), 10);
    }
}
