//! Gaussian likelihood from the prediction-error decomposition.

use crate::error::{Result, SsfError};

pub const LN_2PI: f64 = 1.8378770664093453;

/// Log-likelihood summary of one filter pass.
///
/// `log_det` is the accumulated ln F_t over non-missing, non-diffuse
/// steps; `diffuse_correction` is the diffuse log-determinant picked up
/// while the diffuse dimension collapsed. The scale is concentrated out
/// when `concentrated` is set, following the prediction-error form
///
///   log f = -1/2 * sum(ln 2pi + ln F_t + e_t^2/F_t)
#[derive(Debug, Clone)]
pub struct Likelihood {
    pub log_likelihood: f64,
    /// Sum of squared standardized residuals e_t^2/F_t.
    pub ssq: f64,
    pub log_det: f64,
    pub diffuse_correction: f64,
    /// Non-missing observations used.
    pub n_obs: usize,
    /// Diffuse dimension consumed during collapse.
    pub d: usize,
    pub concentrated: bool,
    /// Estimated (or assumed) innovation scale.
    pub sigma2: f64,
}

impl Likelihood {
    pub fn from_parts(
        ssq: f64,
        log_det: f64,
        diffuse_correction: f64,
        n_obs: usize,
        d: usize,
        concentrated: bool,
    ) -> Result<Self> {
        if n_obs <= d {
            return Err(SsfError::DataError(format!(
                "not enough observations: n={} <= diffuse dim d={}",
                n_obs, d
            )));
        }
        let n_eff = (n_obs - d) as f64;
        let (log_likelihood, sigma2) = if concentrated {
            let sigma2 = (ssq / n_eff).max(1e-300);
            let ll = -0.5
                * (n_eff * LN_2PI + n_eff * (1.0 + sigma2.ln()) + log_det + diffuse_correction);
            (ll, sigma2)
        } else {
            let ll = -0.5 * (n_eff * LN_2PI + log_det + diffuse_correction + ssq);
            (ll, 1.0)
        };
        Ok(Self {
            log_likelihood,
            ssq,
            log_det,
            diffuse_correction,
            n_obs,
            d,
            concentrated,
            sigma2,
        })
    }

    /// Degrees of freedom: non-missing observations minus the diffuse
    /// dimension.
    pub fn df(&self) -> usize {
        self.n_obs - self.d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concentrated_matches_plain_at_unit_scale() {
        // when sigma2_hat = ssq/n_eff = 1 the two forms coincide
        let n = 20;
        let ssq = n as f64;
        let plain = Likelihood::from_parts(ssq, 3.5, 0.0, n, 0, false).unwrap();
        let conc = Likelihood::from_parts(ssq, 3.5, 0.0, n, 0, true).unwrap();
        assert!((plain.log_likelihood - conc.log_likelihood).abs() < 1e-12);
        assert!((conc.sigma2 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_gaussian_observation() {
        // one observation, e=0.5, F=2: ll = -0.5(ln 2pi + ln 2 + 0.125)
        let ssq = 0.25 / 2.0;
        let ll = Likelihood::from_parts(ssq, 2.0f64.ln(), 0.0, 1, 0, false).unwrap();
        let want = -0.5 * (LN_2PI + 2.0f64.ln() + 0.125);
        assert!((ll.log_likelihood - want).abs() < 1e-14);
        assert_eq!(ll.df(), 1);
    }

    #[test]
    fn test_too_few_observations_rejected() {
        assert!(Likelihood::from_parts(1.0, 0.0, 0.0, 2, 2, true).is_err());
    }
}
