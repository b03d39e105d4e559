use crate::skidsteer::{N_CTRL, N_STATE};

// 二次形式の評価関数
// τ = [x; u] として J = 1/2 τ^T Q τ + p^T τ
// Q, p はブロックに分けて持つ
#[derive(Debug, Clone, PartialEq)]
pub struct QuadCost<const S: usize, const C: usize> {
    pub qxx: na::SMatrix<f64, S, S>,
    pub qxu: na::SMatrix<f64, S, C>,
    pub quu: na::SMatrix<f64, C, C>,
    pub px: na::SVector<f64, S>,
    pub pu: na::SVector<f64, C>,
}

impl<const S: usize, const C: usize> QuadCost<S, C> {
    // 対角の重みから評価関数を作る
    pub fn from_diag(
        qx: &na::SVector<f64, S>,
        qu: &na::SVector<f64, C>,
        px: na::SVector<f64, S>,
        pu: na::SVector<f64, C>,
    ) -> Self {
        Self {
            qxx: na::SMatrix::from_diagonal(qx),
            qxu: na::SMatrix::zeros(),
            quu: na::SMatrix::from_diagonal(qu),
            px,
            pu,
        }
    }

    pub fn eval(&self, x: &na::SVector<f64, S>, u: &na::SVector<f64, C>) -> f64 {
        0.5 * x.dot(&(self.qxx * x))
            + x.dot(&(self.qxu * u))
            + 0.5 * u.dot(&(self.quu * u))
            + self.px.dot(x)
            + self.pu.dot(u)
    }

    // (∂J/∂x, ∂J/∂u)
    pub fn grad(
        &self,
        x: &na::SVector<f64, S>,
        u: &na::SVector<f64, C>,
    ) -> (na::SVector<f64, S>, na::SVector<f64, C>) {
        let cx = self.qxx * x + self.qxu * u + self.px;
        let cu = self.qxu.transpose() * x + self.quu * u + self.pu;
        (cx, cu)
    }
}

/// 制御タスク
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// 目標地点 (2, 1, 0) へ向かう
    #[default]
    Swingup,
    /// その場で旋回し続ける
    Spin,
}

impl Mode {
    const CTRL_PENALTY: f64 = 0.001;

    pub fn label(&self) -> &'static str {
        match self {
            Mode::Swingup => "swingup",
            Mode::Spin => "spin",
        }
    }

    // 状態に対する重み <cx, cy, cθ>
    pub fn state_weights(&self) -> na::Vector3<f64> {
        match self {
            Mode::Swingup => na::vector![1.5, 1.5, 1.0],
            Mode::Spin => na::Vector3::from_element(0.001),
        }
    }

    pub fn goal(&self) -> na::Vector3<f64> {
        match self {
            Mode::Swingup => na::vector![2.0, 1.0, 0.0],
            Mode::Spin => na::Vector3::zeros(),
        }
    }

    pub fn cost(&self) -> QuadCost<N_STATE, N_CTRL> {
        let w = self.state_weights();
        match self {
            Mode::Swingup => {
                // px = -sqrt(w) * goal
                let px = -w.map(f64::sqrt).component_mul(&self.goal());
                QuadCost::from_diag(
                    &w,
                    &na::Vector2::from_element(Self::CTRL_PENALTY),
                    px,
                    na::Vector2::zeros(),
                )
            }
            // θ を増やす方向に線形の報酬
            Mode::Spin => QuadCost::from_diag(
                &w,
                &na::Vector2::from_element(0.001),
                na::vector![0.0, 0.0, -1.0],
                na::Vector2::zeros(),
            ),
        }
    }
}
