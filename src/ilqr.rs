use crate::cost::QuadCost;
use crate::dynamics::{Dynamics, GradMethod};
use crate::error::SolverError;
use crate::pnqp::{free_solve, pnqp};
use log::{info, warn};
use rayon::prelude::*;

// 箱型制約付き iLQR による MPC
// 1. 現在の入力列で状態をロールアウト
// 2. 軌道周りでダイナミクスを線形化し, 後退パスでフィードバックゲインを求める
//    各時刻の入力は pnqp で制約を満たすように解く
// 3. 前進パスで直線探索し, コストが下がった軌道を採用
// 4. 入力の変化量が eps を下回れば収束
#[derive(Debug, Clone)]
pub struct Mpc<const S: usize, const C: usize> {
    pub horizon: usize,
    pub u_lower: Option<na::SVector<f64, C>>,
    pub u_upper: Option<na::SVector<f64, C>>,
    pub lqr_iter: usize,
    pub eps: f64,
    pub linesearch_decay: Option<f64>,
    pub max_linesearch_iter: Option<usize>,
    pub exit_unconverged: bool,
    pub grad_method: GradMethod,
    pub verbose: bool,
    pub qp_iter: usize,
}

#[derive(Debug, Clone)]
pub struct Solution<const S: usize, const C: usize> {
    pub states: Vec<na::SVector<f64, S>>,
    pub actions: Vec<na::SVector<f64, C>>,
    /// 各時刻のコスト
    pub objs: Vec<f64>,
    pub cost: f64,
    pub iterations: usize,
    pub converged: bool,
    /// 最後の反復で採用したステップ幅. 採用なしなら 0
    pub alpha: f64,
}

type Gains<const S: usize, const C: usize> = (Vec<na::SVector<f64, C>>, Vec<na::SMatrix<f64, C, S>>);

// 後退パスで Quu が正定値でないときに足す正則化
const REGULARIZATION: [f64; 5] = [0.0, 1e-6, 1e-4, 1e-2, 1.0];

impl<const S: usize, const C: usize> Mpc<S, C> {
    pub fn new(horizon: usize) -> Self {
        Self {
            horizon,
            u_lower: None,
            u_upper: None,
            lqr_iter: 50,
            eps: 1e-2,
            linesearch_decay: None,
            max_linesearch_iter: None,
            exit_unconverged: false,
            grad_method: GradMethod::Analytic,
            verbose: false,
            qp_iter: 20,
        }
    }

    pub fn with_bounds(mut self, lower: na::SVector<f64, C>, upper: na::SVector<f64, C>) -> Self {
        self.u_lower = Some(lower);
        self.u_upper = Some(upper);
        self
    }

    pub fn with_lqr_iter(mut self, lqr_iter: usize) -> Self {
        self.lqr_iter = lqr_iter;
        self
    }

    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_linesearch(mut self, decay: f64, max_iter: usize) -> Self {
        self.linesearch_decay = Some(decay);
        self.max_linesearch_iter = Some(max_iter);
        self
    }

    pub fn with_exit_unconverged(mut self, exit_unconverged: bool) -> Self {
        self.exit_unconverged = exit_unconverged;
        self
    }

    pub fn with_grad_method(mut self, grad_method: GradMethod) -> Self {
        self.grad_method = grad_method;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn bounds<D: Dynamics<S, C>>(&self, dx: &D) -> (na::SVector<f64, C>, na::SVector<f64, C>) {
        (
            self.u_lower.unwrap_or_else(|| dx.lower()),
            self.u_upper.unwrap_or_else(|| dx.upper()),
        )
    }

    pub fn solve<D: Dynamics<S, C>>(
        &self,
        x0: &na::SVector<f64, S>,
        cost: &QuadCost<S, C>,
        dx: &D,
        u_init: Option<&[na::SVector<f64, C>]>,
    ) -> Result<Solution<S, C>, SolverError> {
        let t_len = self.horizon;
        if t_len == 0 {
            return Err(SolverError::EmptyHorizon);
        }
        let (lower, upper) = self.bounds(dx);
        let decay = self.linesearch_decay.unwrap_or_else(|| dx.linesearch_decay());
        let max_ls = self.max_linesearch_iter.unwrap_or_else(|| dx.max_linesearch_iter());
        let clamp = |u: &na::SVector<f64, C>| u.zip_zip_map(&lower, &upper, |e, l, h| e.clamp(l, h));

        // 初期入力列. 足りない分は 0 で埋める
        let mut u: Vec<_> = (0..t_len)
            .map(|t| {
                u_init
                    .and_then(|u| u.get(t))
                    .map(&clamp)
                    .unwrap_or_else(|| clamp(&na::SVector::zeros()))
            })
            .collect();

        let (mut x, mut objs) = rollout(x0, &u, cost, dx);
        let mut total: f64 = objs.iter().sum();
        if !total.is_finite() {
            return Err(SolverError::NonFinite("initial rollout"));
        }

        let mut converged = false;
        let mut iterations = 0;
        let mut max_du = f64::INFINITY;
        let mut used_alpha = 0.0;
        for i in 0..self.lqr_iter {
            iterations = i + 1;
            let (k, big_k) = self.backward(&x, &u, cost, dx, &lower, &upper)?;

            // 直線探索
            let mut alpha = 1.0;
            let mut accepted = None;
            for _ in 0..max_ls {
                let candidate = forward(x0, &x, &u, &k, &big_k, alpha, cost, dx, &clamp);
                let c: f64 = candidate.2.iter().sum();
                if c < total {
                    accepted = Some((candidate, c));
                    break;
                }
                alpha *= decay;
            }

            used_alpha = if accepted.is_some() { alpha } else { 0.0 };
            match accepted {
                Some(((x_new, u_new, objs_new), c)) => {
                    max_du = u
                        .iter()
                        .zip(u_new.iter())
                        .map(|(a, b)| (a - b).amax())
                        .fold(0.0, f64::max);
                    x = x_new;
                    u = u_new;
                    objs = objs_new;
                    total = c;
                }
                // これ以上コストが下がらない
                None => max_du = 0.0,
            }

            if self.verbose {
                info!(
                    "iLQR iter {:3}: cost {:10.4}, max |du| {:.3e}, alpha {:.3e}",
                    iterations, total, max_du, used_alpha
                );
            }

            if max_du < self.eps {
                converged = true;
                break;
            }
        }

        if !converged {
            if self.exit_unconverged {
                return Err(SolverError::NotConverged { iterations, max_du });
            }
            warn!(
                "iLQR not converged after {} iterations (max |du| = {:.3e})",
                iterations, max_du
            );
        }

        Ok(Solution {
            states: x,
            actions: u,
            objs,
            cost: total,
            iterations,
            converged,
            alpha: used_alpha,
        })
    }

    // バッチの各要素は独立なので並列に解く
    pub fn solve_batch<D: Dynamics<S, C>>(
        &self,
        x0: &[na::SVector<f64, S>],
        cost: &QuadCost<S, C>,
        dx: &D,
        u_init: Option<&[Vec<na::SVector<f64, C>>]>,
    ) -> Result<Vec<Solution<S, C>>, SolverError> {
        x0.par_iter()
            .enumerate()
            .map(|(i, x)| {
                let u = u_init.and_then(|u| u.get(i)).map(Vec::as_slice);
                self.solve(x, cost, dx, u)
            })
            .collect()
    }

    fn backward<D: Dynamics<S, C>>(
        &self,
        x: &[na::SVector<f64, S>],
        u: &[na::SVector<f64, C>],
        cost: &QuadCost<S, C>,
        dx: &D,
        lower: &na::SVector<f64, C>,
        upper: &na::SVector<f64, C>,
    ) -> Result<Gains<S, C>, SolverError> {
        let t_len = x.len();
        let mut ks = vec![na::SVector::<f64, C>::zeros(); t_len];
        let mut big_ks = vec![na::SMatrix::<f64, C, S>::zeros(); t_len];
        let mut vx = na::SVector::<f64, S>::zeros();
        let mut vxx = na::SMatrix::<f64, S, S>::zeros();

        for t in (0..t_len).rev() {
            let (cx, cu) = cost.grad(&x[t], &u[t]);
            let (qx, qu, qxx, quu, qux) = if t + 1 == t_len {
                (cx, cu, cost.qxx, cost.quu, cost.qxu.transpose())
            } else {
                let (a, b) = dx.linearize(&x[t], &u[t], self.grad_method);
                (
                    cx + a.transpose() * vx,
                    cu + b.transpose() * vx,
                    cost.qxx + a.transpose() * vxx * a,
                    cost.quu + b.transpose() * vxx * b,
                    cost.qxu.transpose() + b.transpose() * vxx * a,
                )
            };

            let (k, big_k, quu) = self.control_step(t, &quu, &qu, &qux, &(lower - u[t]), &(upper - u[t]))?;

            vx = qx + big_k.transpose() * quu * k + big_k.transpose() * qu + qux.transpose() * k;
            let v = qxx + big_k.transpose() * quu * big_k + big_k.transpose() * qux + qux.transpose() * big_k;
            // 対称性の維持
            vxx = (v + v.transpose()) / 2.0;
            ks[t] = k;
            big_ks[t] = big_k;
        }
        Ok((ks, big_ks))
    }

    // du の箱型 QP を解き, 固定されていない次元についてゲイン K を求める
    #[allow(clippy::type_complexity)]
    fn control_step(
        &self,
        t: usize,
        quu: &na::SMatrix<f64, C, C>,
        qu: &na::SVector<f64, C>,
        qux: &na::SMatrix<f64, C, S>,
        du_lower: &na::SVector<f64, C>,
        du_upper: &na::SVector<f64, C>,
    ) -> Result<(na::SVector<f64, C>, na::SMatrix<f64, C, S>, na::SMatrix<f64, C, C>), SolverError> {
        for mu in REGULARIZATION {
            let quu = quu + na::SMatrix::<f64, C, C>::identity() * mu;
            let qp = match pnqp(&quu, qu, du_lower, du_upper, &na::SVector::zeros(), self.qp_iter) {
                Ok(qp) => qp,
                Err(_) => continue,
            };
            match free_solve(&quu, &qp.free, qux) {
                Ok(sol) => return Ok((qp.x, -sol, quu)),
                Err(_) => continue,
            }
        }
        Err(SolverError::Factorization(t))
    }
}

// 入力列から状態列を求める
fn rollout<D, const S: usize, const C: usize>(
    x0: &na::SVector<f64, S>,
    u: &[na::SVector<f64, C>],
    cost: &QuadCost<S, C>,
    dx: &D,
) -> (Vec<na::SVector<f64, S>>, Vec<f64>)
where
    D: Dynamics<S, C>,
{
    let mut xs = Vec::with_capacity(u.len());
    let mut objs = Vec::with_capacity(u.len());
    let mut x = *x0;
    for u_t in u {
        xs.push(x);
        objs.push(cost.eval(&x, u_t));
        x = dx.step(&x, u_t);
    }
    (xs, objs)
}

#[allow(clippy::too_many_arguments)]
fn forward<D, F, const S: usize, const C: usize>(
    x0: &na::SVector<f64, S>,
    x: &[na::SVector<f64, S>],
    u: &[na::SVector<f64, C>],
    k: &[na::SVector<f64, C>],
    big_k: &[na::SMatrix<f64, C, S>],
    alpha: f64,
    cost: &QuadCost<S, C>,
    dx: &D,
    clamp: &F,
) -> (Vec<na::SVector<f64, S>>, Vec<na::SVector<f64, C>>, Vec<f64>)
where
    D: Dynamics<S, C>,
    F: Fn(&na::SVector<f64, C>) -> na::SVector<f64, C>,
{
    let mut xs = Vec::with_capacity(u.len());
    let mut us = Vec::with_capacity(u.len());
    let mut objs = Vec::with_capacity(u.len());
    let mut x_new = *x0;
    for t in 0..u.len() {
        let u_new = clamp(&(u[t] + alpha * k[t] + big_k[t] * (x_new - x[t])));
        xs.push(x_new);
        objs.push(cost.eval(&x_new, &u_new));
        x_new = dx.step(&x_new, &u_new);
        us.push(u_new);
    }
    (xs, us, objs)
}
