use std::collections::BTreeMap;

use nalgebra::{Cholesky, DMatrix, DVector, Isometry3, Point2};
use tracing::{debug, warn};

use field_geom::{
    CameraCalibration, Landmark, Pose2, SwerveKinematics, SwerveModulePositions,
};

use crate::factors::{
    AccelFactor, AprilTagFactor, BetweenFactor, LinearizedPrior, PriorFactor, YawFactor,
};
use crate::{DiagonalNoise, Factor, Result, SmootherError, Values};

/// Tuning for the smoother. All noise magnitudes are compiled
/// constants for a run.
pub struct SmootherConfig {
    /// States older than `newest - lag_us` are marginalised.
    pub lag_us: i64,
    pub max_iterations: usize,
    /// Gauss-Newton stops when the largest tangent step is below
    /// this.
    pub convergence_tol: f64,
    pub kinematics: SwerveKinematics,
    pub prior_noise: DiagonalNoise,
    /// Odometry between-factor sigmas, tuned for swerve wheel slip.
    pub odometry_noise: DiagonalNoise,
    pub gyro_sigma_rad: f64,
    pub accel_sigma: f64,
    pub pixel_sigma: f64,
}

impl SmootherConfig {
    pub fn new(kinematics: SwerveKinematics) -> Self {
        Self {
            lag_us: 100_000,
            max_iterations: 10,
            convergence_tol: 1e-9,
            kinematics,
            prior_noise: DiagonalNoise::from_sigmas(&[0.3, 0.3, 0.1]),
            odometry_noise: DiagonalNoise::from_sigmas(&[0.02, 0.02, 0.01]),
            gyro_sigma_rad: 1e-4,
            accel_sigma: 0.1,
            pixel_sigma: 1.0,
        }
    }
}

/// Sigma that leaves a residual row effectively unconstrained.
const LOOSE_SIGMA: f64 = 1e6;
/// Diagonal jitter keeping the normal equations positive definite.
const JITTER: f64 = 1e-9;

/// What one `update` did.
#[derive(Debug, Clone, Copy)]
pub struct UpdateReport {
    pub converged: bool,
    pub iterations: usize,
    /// Half the squared whitened residual norm at the solution.
    pub final_error: f64,
    pub marginalized: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninit,
    /// `init` ran; no successful update yet.
    Primed,
    Live,
}

/// The sliding-window smoother.
///
/// Not re-entrant: one owner calls every method. Factors handed to
/// `update` since the previous call sit in the new-factor and
/// new-value bags and are folded into the running graph atomically at
/// the head of the update.
pub struct Smoother {
    config: SmootherConfig,
    factors: Vec<Box<dyn Factor>>,
    new_factors: Vec<Box<dyn Factor>>,
    values: Values,
    new_values: BTreeMap<i64, Pose2>,
    result: Values,
    phase: Phase,
}

impl Smoother {
    pub fn new(config: SmootherConfig) -> Self {
        Self {
            config,
            factors: Vec::new(),
            new_factors: Vec::new(),
            values: Values::new(),
            new_values: BTreeMap::new(),
            result: Values::new(),
            phase: Phase::Uninit,
        }
    }

    /// Seed the trajectory: one state at time zero held by the
    /// configured prior noise.
    pub fn init(&mut self, prior_pose: Pose2) {
        self.add_state(0, prior_pose);
        self.new_factors.push(Box::new(PriorFactor::new(
            0,
            prior_pose,
            self.config.prior_noise.clone(),
        )));
        self.phase = Phase::Primed;
    }

    /// Insert a state variable at `t_us` with the caller's initial
    /// guess. Re-adding an existing key is a no-op.
    ///
    /// The guess matters: the bearing-only tag factor has a
    /// mirror-image minimum, so callers warm-start from the previous
    /// estimate instead of the origin.
    pub fn add_state(&mut self, t_us: i64, initial_guess: Pose2) {
        if self.values.contains(t_us) || self.new_values.contains_key(&t_us) {
            return;
        }
        self.new_values.insert(t_us, initial_guess);
    }

    fn check_key(&self, t_us: i64) -> Result<()> {
        if self.values.contains(t_us) || self.new_values.contains_key(&t_us) {
            Ok(())
        } else {
            Err(SmootherError::InvalidKey { key: t_us })
        }
    }

    /// Pin `t_us` with a unary prior.
    pub fn prior(&mut self, t_us: i64, pose: Pose2, noise: DiagonalNoise) -> Result<()> {
        self.check_key(t_us)?;
        self.new_factors
            .push(Box::new(PriorFactor::new(t_us, pose, noise)));
        Ok(())
    }

    /// Wheel odometry between two module-position snapshots.
    pub fn odometry(
        &mut self,
        t0_us: i64,
        t1_us: i64,
        positions_t0: &SwerveModulePositions,
        positions_t1: &SwerveModulePositions,
    ) -> Result<()> {
        self.check_key(t0_us)?;
        self.check_key(t1_us)?;
        let delta = self.config.kinematics.pose_delta(positions_t0, positions_t1);
        self.new_factors.push(Box::new(BetweenFactor::new(
            t0_us,
            t1_us,
            delta,
            self.config.odometry_noise.clone(),
        )));
        Ok(())
    }

    /// Integrated gyro delta between two instants. Translation rows
    /// are unconstrained. With `t0 == t1` this degenerates to a
    /// unary yaw observation of the single state.
    pub fn gyro(&mut self, t0_us: i64, t1_us: i64, dtheta: f64) -> Result<()> {
        self.check_key(t0_us)?;
        if t0_us == t1_us {
            self.new_factors.push(Box::new(YawFactor::new(
                t0_us,
                dtheta,
                self.config.gyro_sigma_rad,
            )));
            return Ok(());
        }
        self.check_key(t1_us)?;
        self.new_factors.push(Box::new(BetweenFactor::new(
            t0_us,
            t1_us,
            Pose2::new(0.0, 0.0, dtheta),
            DiagonalNoise::from_sigmas(&[LOOSE_SIGMA, LOOSE_SIGMA, self.config.gyro_sigma_rad]),
        )));
        Ok(())
    }

    /// Body-frame acceleration over three consecutive instants.
    pub fn accelerometer(
        &mut self,
        t0_us: i64,
        t1_us: i64,
        t2_us: i64,
        ax: f64,
        ay: f64,
    ) -> Result<()> {
        self.check_key(t0_us)?;
        self.check_key(t1_us)?;
        self.check_key(t2_us)?;
        self.new_factors.push(Box::new(AccelFactor::new(
            t0_us,
            t1_us,
            t2_us,
            ax,
            ay,
            self.config.accel_sigma,
        )));
        Ok(())
    }

    /// Bearing-only pixel observation of a mapped tag.
    pub fn apriltag_for_smoothing(
        &mut self,
        landmark: &Landmark,
        pixel: Point2<f64>,
        t_us: i64,
        camera_extrinsic: &Isometry3<f64>,
        calib: &CameraCalibration,
    ) -> Result<()> {
        self.check_key(t_us)?;
        let factor_calib = CameraCalibration::new(
            calib.intrinsics.clone(),
            *camera_extrinsic,
            calib.width,
            calib.height,
        );
        self.new_factors.push(Box::new(AprilTagFactor::new(
            t_us,
            landmark.position(),
            pixel,
            factor_calib,
            self.config.pixel_sigma,
        )));
        Ok(())
    }

    /// The estimate from the last converged update; holds exactly the
    /// keys currently in the window.
    pub fn result(&self) -> &Values {
        &self.result
    }

    pub fn pose(&self, t_us: i64) -> Option<Pose2> {
        self.result.get(t_us)
    }

    /// Fold in the pending bags and run one incremental solve.
    pub fn update(&mut self) -> Result<UpdateReport> {
        if self.phase == Phase::Uninit {
            return Err(SmootherError::Uninitialized);
        }
        // Commit the bags atomically before solving.
        for (k, v) in std::mem::take(&mut self.new_values) {
            self.values.insert(k, v);
        }
        self.factors.append(&mut self.new_factors);

        let keys: Vec<i64> = self.values.keys().collect();
        let index: BTreeMap<i64, usize> =
            keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();

        let snapshot = self.values.clone();
        let mut converged = false;
        let mut solvable = true;
        let mut iterations = 0;
        let mut final_error = 0.0;

        for _ in 0..self.config.max_iterations {
            let (h, b, err) = self.linearize(&keys, &index);
            final_error = err;

            let mut h_reg = h;
            for i in 0..h_reg.nrows() {
                h_reg[(i, i)] += JITTER;
            }
            let chol = match Cholesky::new(h_reg) {
                Some(c) => c,
                None => {
                    solvable = false;
                    break;
                }
            };
            let step = chol.solve(&(-&b));
            for (i, &k) in keys.iter().enumerate() {
                let delta = nalgebra::Vector3::new(step[3 * i], step[3 * i + 1], step[3 * i + 2]);
                self.values.insert(k, self.values.pose(k).retract(&delta));
            }
            iterations += 1;
            if step.amax() < self.config.convergence_tol {
                converged = true;
                break;
            }
        }

        if !converged {
            if solvable {
                warn!(
                    "smoother did not converge in {} iterations (error {final_error:.3e}); keeping last estimate",
                    self.config.max_iterations
                );
            } else {
                warn!("normal equations not positive definite; keeping last estimate");
            }
            self.values = snapshot;
            self.result = self.values.clone();
            return Ok(UpdateReport {
                converged: false,
                iterations,
                final_error,
                marginalized: 0,
            });
        }

        self.phase = Phase::Live;
        let marginalized = self.marginalize();
        self.result = self.values.clone();
        Ok(UpdateReport {
            converged,
            iterations,
            final_error,
            marginalized,
        })
    }

    /// Assemble the whitened normal equations over the given
    /// ordering. Returns `(H, gradient, total error)`.
    fn linearize(
        &self,
        keys: &[i64],
        index: &BTreeMap<i64, usize>,
    ) -> (DMatrix<f64>, DVector<f64>, f64) {
        let dim = 3 * keys.len();
        let mut h = DMatrix::zeros(dim, dim);
        let mut b = DVector::zeros(dim);
        let mut total_error = 0.0;

        for factor in &self.factors {
            scatter_factor(
                factor.as_ref(),
                &self.values,
                index,
                &mut h,
                &mut b,
                &mut total_error,
            );
        }
        (h, b, total_error)
    }

    /// Remove states older than the lag window.
    ///
    /// Factors touching only dead states contribute to the marginal
    /// and are then dropped; factors straddling the boundary are
    /// linearised about the current estimate and Schur-complemented
    /// into a [`LinearizedPrior`] over the surviving boundary states.
    /// Keys and factors go together, atomically.
    fn marginalize(&mut self) -> usize {
        let newest = match self.values.newest_key() {
            Some(k) => k,
            None => return 0,
        };
        let cutoff = newest - self.config.lag_us;
        let dead: Vec<i64> = self.values.keys().filter(|k| *k < cutoff).collect();
        if dead.is_empty() {
            return 0;
        }
        let is_dead = |k: i64| dead.binary_search(&k).is_ok();

        let mut keep = Vec::with_capacity(self.factors.len());
        let mut absorbed: Vec<Box<dyn Factor>> = Vec::new();
        for factor in self.factors.drain(..) {
            if factor.keys().iter().any(|k| is_dead(*k)) {
                absorbed.push(factor);
            } else {
                keep.push(factor);
            }
        }

        // Boundary: live states coupled to a dead one.
        let mut boundary: Vec<i64> = absorbed
            .iter()
            .flat_map(|f| f.keys().iter().copied())
            .filter(|k| !is_dead(*k))
            .collect();
        boundary.sort_unstable();
        boundary.dedup();

        if !boundary.is_empty() {
            match self.build_marginal(&dead, &boundary, &absorbed) {
                Some(marginal) => keep.push(Box::new(marginal)),
                None => {
                    // Rank-deficient corner case: the information the
                    // dead states carried is lost, which only widens
                    // the posterior.
                    warn!("marginal factorization failed; dropping {} factors", absorbed.len());
                }
            }
        }

        for k in &dead {
            self.values.remove(*k);
        }
        self.factors = keep;
        debug!(
            "marginalized {} states before {cutoff} us, window now {}",
            dead.len(),
            self.values.len()
        );
        dead.len()
    }

    fn build_marginal(
        &self,
        dead: &[i64],
        boundary: &[i64],
        absorbed: &[Box<dyn Factor>],
    ) -> Option<LinearizedPrior> {
        let ordered: Vec<i64> = dead.iter().chain(boundary.iter()).copied().collect();
        let index: BTreeMap<i64, usize> =
            ordered.iter().enumerate().map(|(i, k)| (*k, i)).collect();
        let nd = 3 * dead.len();
        let nb = 3 * boundary.len();
        let dim = nd + nb;

        let mut h = DMatrix::zeros(dim, dim);
        let mut g = DVector::zeros(dim);
        let mut discard = 0.0;
        for factor in absorbed {
            scatter_factor(
                factor.as_ref(),
                &self.values,
                &index,
                &mut h,
                &mut g,
                &mut discard,
            );
        }
        for i in 0..dim {
            h[(i, i)] += JITTER;
        }

        let hdd = h.view((0, 0), (nd, nd)).into_owned();
        let hdb = h.view((0, nd), (nd, nb)).into_owned();
        let hbd = h.view((nd, 0), (nb, nd)).into_owned();
        let hbb = h.view((nd, nd), (nb, nb)).into_owned();
        let gd = g.rows(0, nd).into_owned();
        let gb = g.rows(nd, nb).into_owned();

        let chol_dd = Cholesky::new(hdd)?;
        let h_marg = &hbb - &hbd * chol_dd.solve(&hdb);
        let g_marg = &gb - &hbd * chol_dd.solve(&gd);

        let mut h_marg_reg = h_marg;
        for i in 0..nb {
            h_marg_reg[(i, i)] += JITTER;
        }
        let chol_m = Cholesky::new(h_marg_reg)?;
        let l = chol_m.l();
        let sqrt_info = l.transpose();
        let offset = l.solve_lower_triangular(&g_marg)?;

        let lin_points = boundary.iter().map(|k| self.values.pose(*k)).collect();
        Some(LinearizedPrior::new(
            boundary.to_vec(),
            lin_points,
            sqrt_info,
            offset,
        ))
    }
}

/// Accumulate one factor's whitened contribution into `H` and `b`.
fn scatter_factor(
    factor: &dyn Factor,
    values: &Values,
    index: &BTreeMap<i64, usize>,
    h: &mut DMatrix<f64>,
    b: &mut DVector<f64>,
    total_error: &mut f64,
) {
    let r = factor.error(values);
    let rw = factor.noise().whiten_vec(&r);
    *total_error += 0.5 * rw.norm_squared();

    let jacs = factor.jacobians(values);
    let jws: Vec<DMatrix<f64>> = jacs.iter().map(|j| factor.noise().whiten_mat(j)).collect();

    for (a, &ka) in factor.keys().iter().enumerate() {
        let ia = 3 * index[&ka];
        let grad = jws[a].transpose() * &rw;
        for r_i in 0..3 {
            b[ia + r_i] += grad[r_i];
        }
        for (bb, &kb) in factor.keys().iter().enumerate() {
            let ib = 3 * index[&kb];
            let block = jws[a].transpose() * &jws[bb];
            for r_i in 0..3 {
                for c_i in 0..3 {
                    h[(ia + r_i, ib + c_i)] += block[(r_i, c_i)];
                }
            }
        }
    }
}
