use crate::dynamics::Dynamics;

// スキッドステア車両の運動学モデル
// 状態変数は x, y, θ の3つ
// 入力は左右クローラの速度 v_l, v_r
// ICR (瞬間回転中心) の滑り係数 χ でトレッドを実効的に広げる
//   v = (v_l + v_r) / 2
//   ω = (v_r - v_l) / (χ b)
//   x' = x + v cosθ dt, y' = y + v sinθ dt, θ' = θ + ω dt

pub const N_STATE: usize = 3;
pub const N_CTRL: usize = 2;

pub type State = na::SVector<f64, N_STATE>;
pub type Control = na::SVector<f64, N_CTRL>;

#[derive(Debug, Clone)]
pub struct SkidSteer {
    /// 離散化の時間刻み [s]
    pub dt: f64,
    /// トレッド幅 [m]
    pub track_width: f64,
    /// 車体長 [m] (描画用)
    pub length: f64,
    /// ICR 滑り係数 (χ >= 1)
    pub slip: f64,
    /// クローラ速度の上下限 [m/s]
    pub max_speed: f64,
    pub linesearch_decay: f64,
    pub max_linesearch_iter: usize,
}

impl SkidSteer {
    const DT: f64 = 0.1;
    const TRACK_WIDTH: f64 = 0.5;
    const LENGTH: f64 = 0.7;
    const SLIP: f64 = 1.5;
    const MAX_SPEED: f64 = 1.0;

    // simple = true なら滑りのない差動二輪として扱う
    pub fn new(simple: bool) -> Self {
        Self {
            dt: Self::DT,
            track_width: Self::TRACK_WIDTH,
            length: Self::LENGTH,
            slip: if simple { 1.0 } else { Self::SLIP },
            max_speed: Self::MAX_SPEED,
            linesearch_decay: 0.2,
            max_linesearch_iter: 10,
        }
    }

    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    pub fn with_max_speed(mut self, max_speed: f64) -> Self {
        self.max_speed = max_speed;
        self
    }

    fn effective_track(&self) -> f64 {
        self.slip * self.track_width
    }
}

impl Default for SkidSteer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Dynamics<N_STATE, N_CTRL> for SkidSteer {
    fn step(&self, x: &State, u: &Control) -> State {
        let v = (u[0] + u[1]) / 2.0;
        let w = (u[1] - u[0]) / self.effective_track();
        let mut r = *x;
        r[0] += v * x[2].cos() * self.dt;
        r[1] += v * x[2].sin() * self.dt;
        r[2] += w * self.dt;
        r
    }

    fn jacobians(
        &self,
        x: &State,
        u: &Control,
    ) -> (na::SMatrix<f64, N_STATE, N_STATE>, na::SMatrix<f64, N_STATE, N_CTRL>) {
        let v = (u[0] + u[1]) / 2.0;
        let (s, c) = x[2].sin_cos();
        let dt = self.dt;
        let k = dt / self.effective_track();

        let mut a = na::Matrix3::identity();
        a[(0, 2)] = -v * s * dt;
        a[(1, 2)] = v * c * dt;

        let b = na::matrix![
            0.5 * c * dt, 0.5 * c * dt;
            0.5 * s * dt, 0.5 * s * dt;
            -k, k;
        ];
        (a, b)
    }

    fn lower(&self) -> Control {
        Control::from_element(-self.max_speed)
    }

    fn upper(&self) -> Control {
        Control::from_element(self.max_speed)
    }

    fn linesearch_decay(&self) -> f64 {
        self.linesearch_decay
    }

    fn max_linesearch_iter(&self) -> usize {
        self.max_linesearch_iter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::finite_difference;
    use approx::assert_relative_eq;
    use na::vector;

    #[test]
    fn equal_tracks_drive_straight() {
        let dx = SkidSteer::new(true);
        let x = vector![0.0, 0.0, 0.3];
        let r = dx.step(&x, &vector![0.5, 0.5]);
        assert_relative_eq!(r[2], 0.3);
        assert_relative_eq!(r[0], 0.5 * 0.3f64.cos() * dx.dt, epsilon = 1e-12);
        assert_relative_eq!(r[1], 0.5 * 0.3f64.sin() * dx.dt, epsilon = 1e-12);
    }

    #[test]
    fn opposite_tracks_spin_in_place() {
        let dx = SkidSteer::new(true);
        let r = dx.step(&vector![1.0, -1.0, 0.0], &vector![-0.5, 0.5]);
        assert_relative_eq!(r[0], 1.0);
        assert_relative_eq!(r[1], -1.0);
        assert_relative_eq!(r[2], 1.0 / dx.track_width * dx.dt, epsilon = 1e-12);
    }

    #[test]
    fn slip_slows_turning() {
        let u = vector![-0.5, 0.5];
        let x = State::zeros();
        let ideal = SkidSteer::new(true).step(&x, &u);
        let slipping = SkidSteer::new(false).step(&x, &u);
        assert!(slipping[2].abs() < ideal[2].abs());
    }

    #[test]
    fn analytic_jacobians_match_finite_difference() {
        for simple in [true, false] {
            let dx = SkidSteer::new(simple);
            let x = vector![0.4, -0.2, 0.7];
            let u = vector![0.3, -0.8];
            let (a, b) = dx.jacobians(&x, &u);
            let (a_fd, b_fd) = finite_difference(&dx, &x, &u, 1e-6);
            assert_relative_eq!(a, a_fd, epsilon = 1e-7);
            assert_relative_eq!(b, b_fd, epsilon = 1e-7);
        }
    }

    #[test]
    fn bounds_are_symmetric() {
        let dx = SkidSteer::default().with_max_speed(2.0);
        assert_eq!(dx.lower(), vector![-2.0, -2.0]);
        assert_eq!(dx.upper(), vector![2.0, 2.0]);
    }
}
