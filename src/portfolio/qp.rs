//! # Active-Set Quadratic Programming
//!
//! $$
//! \min_{\mathbf w}\ \tfrac12\mathbf w^\top Q\mathbf w + \mathbf c^\top\mathbf w
//! \quad\text{s.t.}\quad A\mathbf w=\mathbf b,\ \ \mathbf l\le\mathbf w\le\mathbf u
//! $$
//!
//! Primal active-set solver for strictly convex QPs with equality rows and
//! box bounds. Each iteration solves the equality-constrained subproblem on
//! the free variables exactly through a Cholesky factor and a Schur
//! complement.

use nalgebra::Cholesky;
use nalgebra::DMatrix;
use nalgebra::DVector;
use nalgebra::Dyn;
use tracing::debug;

use crate::error::PortfolioError;
use crate::error::Result;

const STEP_TOL: f64 = 1e-12;
const DUAL_TOL: f64 = 1e-10;
const RANK_TOL: f64 = 1e-10;
const FEAS_TOL: f64 = 1e-9;
/// Smallest admissible squared Cholesky pivot relative to the largest
/// diagonal entry.
const PIVOT_TOL: f64 = 1e-12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BoundState {
  Free,
  Lower,
  Upper,
}

/// Equality rows and box bounds of one solve.
pub(crate) struct Constraints<'a> {
  pub a: &'a DMatrix<f64>,
  pub b: &'a DVector<f64>,
  pub lower: &'a DVector<f64>,
  pub upper: &'a DVector<f64>,
}

#[derive(Clone, Debug)]
pub(crate) struct QpSolution {
  pub x: DVector<f64>,
  pub iterations: usize,
}

/// Quadratic term of the objective, normalized and factorized once.
///
/// The same instance serves any number of solves with different linear
/// terms, constraints and starting points.
#[derive(Clone, Debug)]
pub(crate) struct ActiveSetQp {
  q: DMatrix<f64>,
  scale: f64,
  factor: Cholesky<f64, Dyn>,
  max_iter: usize,
}

impl ActiveSetQp {
  /// Fails with [`PortfolioError::SingularCovariance`] unless `q` is
  /// positive definite within tolerance.
  pub fn new(q: &DMatrix<f64>) -> Result<Self> {
    let n = q.nrows();
    if n == 0 || q.ncols() != n {
      return Err(PortfolioError::AssetMismatch(format!(
        "quadratic term must be square and non-empty, got {}x{}",
        q.nrows(),
        q.ncols()
      )));
    }

    let scale = q.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if scale <= 0.0 || !scale.is_finite() {
      return Err(PortfolioError::SingularCovariance(
        "covariance matrix is zero".into(),
      ));
    }

    let q = q / scale;
    let factor = q.clone().cholesky().ok_or_else(|| {
      PortfolioError::SingularCovariance("covariance matrix is not positive definite".into())
    })?;

    let l = factor.l();
    let min_pivot = (0..n).map(|i| l[(i, i)]).fold(f64::INFINITY, f64::min);
    let max_diag = (0..n).map(|i| q[(i, i)]).fold(0.0_f64, f64::max);
    if min_pivot * min_pivot < PIVOT_TOL * max_diag {
      return Err(PortfolioError::SingularCovariance(format!(
        "smallest Cholesky pivot {min_pivot:e} is numerically zero; \
         assets are collinear, regularize (e.g. shrinkage) first"
      )));
    }

    Ok(Self {
      q,
      scale,
      factor,
      max_iter: 50 * (n + 2) + 100,
    })
  }

  pub fn dim(&self) -> usize {
    self.q.nrows()
  }

  /// Minimize `1/2 x'Qx + c'x` from the feasible starting point `x0`.
  pub fn solve(&self, c: &DVector<f64>, cons: &Constraints<'_>, x0: DVector<f64>) -> Result<QpSolution> {
    let n = self.dim();
    let c = c / self.scale;
    let (a, b) = independent_system(cons.a, cons.b);
    let (lower, upper) = (cons.lower, cons.upper);

    let mut x = x0;
    for i in 0..n {
      if x[i] < lower[i] - FEAS_TOL || x[i] > upper[i] + FEAS_TOL {
        return Err(PortfolioError::ConvergenceError(format!(
          "starting point violates the bounds of variable {i}"
        )));
      }
      x[i] = x[i].clamp(lower[i], upper[i]);
    }
    if (&a * &x - &b).amax() > FEAS_TOL {
      return Err(PortfolioError::ConvergenceError(
        "starting point violates the equality constraints".into(),
      ));
    }

    let mut state = vec![BoundState::Free; n];
    for i in 0..n {
      let side = if (x[i] - lower[i]).abs() <= STEP_TOL {
        BoundState::Lower
      } else if (upper[i] - x[i]).abs() <= STEP_TOL {
        BoundState::Upper
      } else {
        continue;
      };

      state[i] = side;
      if full_row_rank(&a, &free_indices(&state)) {
        x[i] = if side == BoundState::Lower { lower[i] } else { upper[i] };
      } else {
        state[i] = BoundState::Free;
      }
    }

    let mut stalled = false;
    for iter in 0..self.max_iter {
      let free = free_indices(&state);
      let g = &self.q * &x + &c;
      let (p, lambda) = self.equality_step(&a, &free, &g)?;

      if p.amax() <= STEP_TOL {
        let reduced = &g + a.transpose() * &lambda;
        let mut release: Option<(usize, f64)> = None;
        for i in 0..n {
          let nu = match state[i] {
            BoundState::Free => continue,
            BoundState::Lower => reduced[i],
            BoundState::Upper => -reduced[i],
          };
          if nu >= -DUAL_TOL {
            continue;
          }
          // Bland's rule after a zero-length step keeps degenerate vertices
          // from cycling.
          let better = match release {
            None => true,
            Some((_, worst)) => !stalled && nu < worst,
          };
          if better {
            release = Some((i, nu));
          }
        }

        match release {
          None => {
            let residual = (&a * &x - &b).amax();
            if residual > FEAS_TOL {
              return Err(PortfolioError::ConvergenceError(format!(
                "equality residual {residual:e} after {iter} iterations"
              )));
            }
            debug!(iterations = iter, active = n - free.len(), "qp solved");
            return Ok(QpSolution {
              x,
              iterations: iter,
            });
          }
          Some((i, _)) => {
            state[i] = BoundState::Free;
            continue;
          }
        }
      }

      let mut alpha = 1.0;
      let mut blocking: Option<(usize, BoundState)> = None;
      for (k, &i) in free.iter().enumerate() {
        let (limit, side) = if p[k] < -STEP_TOL {
          ((lower[i] - x[i]) / p[k], BoundState::Lower)
        } else if p[k] > STEP_TOL {
          ((upper[i] - x[i]) / p[k], BoundState::Upper)
        } else {
          continue;
        };
        if limit < alpha {
          alpha = limit.max(0.0);
          blocking = Some((i, side));
        }
      }

      for (k, &i) in free.iter().enumerate() {
        x[i] += alpha * p[k];
      }
      stalled = alpha <= 0.0;

      if let Some((i, side)) = blocking {
        state[i] = side;
        x[i] = if side == BoundState::Lower { lower[i] } else { upper[i] };
      }
    }

    Err(PortfolioError::ConvergenceError(format!(
      "active-set iteration budget of {} exhausted",
      self.max_iter
    )))
  }

  /// Step `p` on the free variables and equality multipliers `lambda` of
  ///
  /// ```text
  /// [Q_FF  A_F'] [p]      [-g_F]
  /// [A_F   0   ] [lambda] = [ 0 ]
  /// ```
  fn equality_step(
    &self,
    a: &DMatrix<f64>,
    free: &[usize],
    g: &DVector<f64>,
  ) -> Result<(DVector<f64>, DVector<f64>)> {
    let n = self.dim();
    let m = a.nrows();
    let k = free.len();
    if k == 0 {
      return Ok((DVector::zeros(0), DVector::zeros(m)));
    }

    let sub_factor;
    let chol = if k == n {
      &self.factor
    } else {
      let q_ff = self.q.select_rows(free.iter()).select_columns(free.iter());
      sub_factor = q_ff.cholesky().ok_or_else(|| {
        PortfolioError::ConvergenceError("reduced Hessian lost positive definiteness".into())
      })?;
      &sub_factor
    };

    let g_f = DVector::from_iterator(k, free.iter().map(|&i| g[i]));
    let z = chol.solve(&g_f);
    if m == 0 {
      return Ok((-z, DVector::zeros(0)));
    }

    let a_f = a.select_columns(free.iter());
    let y = chol.solve(&a_f.transpose());
    let schur = &a_f * &y;
    let rhs = -(&a_f * &z);
    let lambda = schur
      .cholesky()
      .ok_or_else(|| {
        PortfolioError::ConvergenceError("equality constraints became dependent".into())
      })?
      .solve(&rhs);

    let p = -(z + &y * &lambda);
    Ok((p, lambda))
  }
}

fn free_indices(state: &[BoundState]) -> Vec<usize> {
  state
    .iter()
    .enumerate()
    .filter(|(_, s)| **s == BoundState::Free)
    .map(|(i, _)| i)
    .collect()
}

/// Rows of `a` (restricted to `cols`) that are linearly independent of the
/// rows before them, by Gram-Schmidt.
fn independent_rows(a: &DMatrix<f64>, cols: &[usize]) -> Vec<usize> {
  let mut basis: Vec<DVector<f64>> = Vec::with_capacity(a.nrows());
  let mut keep = Vec::with_capacity(a.nrows());

  for r in 0..a.nrows() {
    let mut v = DVector::from_iterator(cols.len(), cols.iter().map(|&j| a[(r, j)]));
    let norm0 = v.norm();
    if norm0 == 0.0 {
      continue;
    }
    for e in &basis {
      let proj = e.dot(&v);
      v -= e * proj;
    }
    let norm = v.norm();
    if norm > RANK_TOL * norm0 {
      basis.push(v / norm);
      keep.push(r);
    }
  }

  keep
}

fn full_row_rank(a: &DMatrix<f64>, cols: &[usize]) -> bool {
  independent_rows(a, cols).len() == a.nrows()
}

/// Drops redundant equality rows and normalizes the rest to unit norm.
fn independent_system(a: &DMatrix<f64>, b: &DVector<f64>) -> (DMatrix<f64>, DVector<f64>) {
  let all: Vec<usize> = (0..a.ncols()).collect();
  let rows = independent_rows(a, &all);

  let mut a_out = a.select_rows(rows.iter());
  let mut b_out = b.select_rows(rows.iter());
  for r in 0..a_out.nrows() {
    let norm = a_out.row(r).norm();
    a_out.row_mut(r).unscale_mut(norm);
    b_out[r] /= norm;
  }
  (a_out, b_out)
}
