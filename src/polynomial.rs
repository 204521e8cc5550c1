//! Lag-polynomial helpers for the ARMA state-space builder.

/// Polynomial multiplication (convolution): c[k] = sum_i a[i]*b[k-i].
pub fn polymul(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return vec![];
    }
    let mut r = vec![0.0; a.len() + b.len() - 1];
    for (i, &ai) in a.iter().enumerate() {
        for (j, &bj) in b.iter().enumerate() {
            r[i + j] += ai * bj;
        }
    }
    r
}

/// AR polynomial: 1 - phi_1*L - phi_2*L^2 - ...
/// `coeffs` = [phi_1, phi_2, ...].
pub fn make_ar_poly(coeffs: &[f64]) -> Vec<f64> {
    let mut p = vec![0.0; coeffs.len() + 1];
    p[0] = 1.0;
    for (i, &c) in coeffs.iter().enumerate() {
        p[i + 1] = -c;
    }
    p
}

/// MA polynomial: 1 + theta_1*L + theta_2*L^2 + ...
/// `coeffs` = [theta_1, theta_2, ...].
pub fn make_ma_poly(coeffs: &[f64]) -> Vec<f64> {
    let mut p = vec![0.0; coeffs.len() + 1];
    p[0] = 1.0;
    for (i, &c) in coeffs.iter().enumerate() {
        p[i + 1] = c;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polymul_basic() {
        // (1 + 2x)(1 + 3x) = 1 + 5x + 6x^2
        let r = polymul(&[1.0, 2.0], &[1.0, 3.0]);
        assert_eq!(r.len(), 3);
        assert!((r[0] - 1.0).abs() < 1e-10);
        assert!((r[1] - 5.0).abs() < 1e-10);
        assert!((r[2] - 6.0).abs() < 1e-10);
    }

    #[test]
    fn test_polymul_empty() {
        assert!(polymul(&[], &[1.0]).is_empty());
    }

    #[test]
    fn test_ar_poly_signs() {
        // 1 - 0.5 L + 0.3 L^2
        let p = make_ar_poly(&[0.5, -0.3]);
        assert_eq!(p, vec![1.0, -0.5, 0.3]);
    }

    #[test]
    fn test_ma_poly_signs() {
        // 1 + 0.4 L
        let p = make_ma_poly(&[0.4]);
        assert_eq!(p, vec![1.0, 0.4]);
    }
}
