use crate::cost::Mode;
use crate::dynamics::{Dynamics, GradMethod};
use crate::ilqr::Mpc;
use crate::skidsteer::{SkidSteer, N_CTRL, N_STATE};
use clap::builder::RangedU64ValueParser;
use clap::Parser;
use std::path::PathBuf;

/// スキッドステア車両の MPC 閉ループシミュレーション
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Config {
    /// 制御タスク
    #[arg(long, value_enum, default_value_t = Mode::Swingup)]
    pub mode: Mode,

    /// 初期状態の乱数シード
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    #[arg(long, default_value_t = 16)]
    pub n_batch: usize,

    /// シミュレーションのステップ数
    #[arg(long, default_value_t = 60)]
    pub steps: usize,

    /// 予測ホライゾン
    #[arg(
        long,
        default_value_t = 20,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub horizon: usize,

    #[arg(long, default_value_t = 50)]
    pub lqr_iter: usize,

    /// 収束判定の閾値
    #[arg(long, default_value_t = 1e-2)]
    pub eps: f64,

    /// 滑りを考慮したモデルを使う
    #[arg(long)]
    pub full_model: bool,

    /// ヤコビアンを数値微分で求める
    #[arg(long)]
    pub finite_diff: bool,

    /// iLQR の反復ごとにログを出す
    #[arg(long)]
    pub verbose: bool,

    #[arg(long, default_value_t = 16)]
    pub fps: u32,

    #[arg(long, default_value_t = 25)]
    pub crf: u32,

    /// 動画の出力先
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    /// 動画を作らない
    #[arg(long)]
    pub no_video: bool,

    /// 軌跡の CSV ログ
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_from(["skidsteer"])
    }
}

impl Config {
    pub fn dynamics(&self) -> SkidSteer {
        SkidSteer::new(!self.full_model)
    }

    pub fn mpc(&self, dx: &SkidSteer) -> Mpc<N_STATE, N_CTRL> {
        let grad_method = if self.finite_diff {
            GradMethod::FiniteDiff
        } else {
            GradMethod::Analytic
        };
        Mpc::new(self.horizon)
            .with_bounds(dx.lower(), dx.upper())
            .with_lqr_iter(self.lqr_iter)
            .with_eps(self.eps)
            .with_linesearch(dx.linesearch_decay(), dx.max_linesearch_iter())
            .with_exit_unconverged(false)
            .with_grad_method(grad_method)
            .with_verbose(self.verbose)
    }
}
