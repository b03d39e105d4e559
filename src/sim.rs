use crate::cost::QuadCost;
use crate::dynamics::Dynamics;
use crate::error::SolverError;
use crate::ilqr::Mpc;
use crate::skidsteer::{Control, State, N_CTRL, N_STATE};
use rand::Rng;

/// 初期状態 x, y, θ の一様分布の範囲
pub const INIT_RANGES: [(f64, f64); N_STATE] = [(-0.05, 0.05), (-0.5, 0.5), (-0.15, 0.15)];

// 初期状態をランダムに生成する
// 成分ごとにバッチ分をまとめて引く
pub fn uniform_batch<R: Rng>(rng: &mut R, n: usize, ranges: &[(f64, f64); N_STATE]) -> Vec<State> {
    let mut batch = vec![State::zeros(); n];
    for (i, (low, high)) in ranges.iter().enumerate() {
        for x in batch.iter_mut() {
            x[i] = rng.gen::<f64>() * (high - low) + low;
        }
    }
    batch
}

// 次の時刻の初期入力列
// 先頭を捨てて末尾を 0 で埋め, 末尾から2番目に3番目の値を写す
pub fn shift_warm_start(actions: &[Control]) -> Vec<Control> {
    let mut u: Vec<Control> = actions.iter().skip(1).copied().collect();
    u.push(Control::zeros());
    let n = u.len();
    if n >= 3 {
        u[n - 2] = u[n - 3];
    }
    u
}

/// 1ステップ分の記録
pub struct Step<'a> {
    pub t: usize,
    pub states: &'a [State],
    pub actions: &'a [Control],
    /// 初期状態を含むここまでの状態
    pub history: &'a [Vec<State>],
}

pub struct Simulation<D> {
    pub mpc: Mpc<N_STATE, N_CTRL>,
    pub cost: QuadCost<N_STATE, N_CTRL>,
    pub dx: D,
    pub goal: State,
    pub x: Vec<State>,
    pub u_init: Option<Vec<Vec<Control>>>,
    pub history: Vec<Vec<State>>,
    pub actions: Vec<Vec<Control>>,
    /// Σ_t Σ_batch ||x - goal||
    pub cum_cost: f64,
}

impl<D: Dynamics<N_STATE, N_CTRL>> Simulation<D> {
    pub fn new(
        mpc: Mpc<N_STATE, N_CTRL>,
        cost: QuadCost<N_STATE, N_CTRL>,
        dx: D,
        x_init: Vec<State>,
        goal: State,
    ) -> Self {
        Self {
            mpc,
            cost,
            dx,
            goal,
            history: vec![x_init.clone()],
            x: x_init,
            u_init: None,
            actions: Vec::new(),
            cum_cost: 0.0,
        }
    }

    // MPC を解いて最初の入力だけを適用する
    pub fn step(&mut self) -> Result<(), SolverError> {
        let solutions = self
            .mpc
            .solve_batch(&self.x, &self.cost, &self.dx, self.u_init.as_deref())?;

        let next_action: Vec<Control> = solutions.iter().map(|s| s.actions[0]).collect();
        self.u_init = Some(solutions.iter().map(|s| shift_warm_start(&s.actions)).collect());
        self.x = self
            .x
            .iter()
            .zip(next_action.iter())
            .map(|(x, u)| self.dx.step(x, u))
            .collect();

        if self.x.iter().any(|x| !x.iter().all(|e| e.is_finite())) {
            return Err(SolverError::NonFinite("closed-loop state"));
        }

        self.cum_cost += self.x.iter().map(|x| (x - self.goal).norm()).sum::<f64>();
        self.history.push(self.x.clone());
        self.actions.push(next_action);
        Ok(())
    }

    pub fn run<F>(&mut self, n_steps: usize, mut on_step: F) -> anyhow::Result<()>
    where
        F: FnMut(&Step<'_>) -> anyhow::Result<()>,
    {
        for t in 0..n_steps {
            self.step()?;
            let step = Step {
                t,
                states: &self.x,
                actions: self.actions.last().map(Vec::as_slice).unwrap_or_default(),
                history: &self.history,
            };
            on_step(&step)?;
        }
        Ok(())
    }
}

// 1 ステップ分の CSV ログ: t, 車両番号, u_l, u_r, x, y, θ
pub fn write_step<W: std::io::Write>(wtr: &mut csv::Writer<W>, step: &Step<'_>) -> csv::Result<()> {
    for (i, (x, u)) in step.states.iter().zip(step.actions.iter()).enumerate() {
        wtr.write_record(&[
            step.t.to_string(),
            i.to_string(),
            u[0].to_string(),
            u[1].to_string(),
            x[0].to_string(),
            x[1].to_string(),
            x[2].to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
