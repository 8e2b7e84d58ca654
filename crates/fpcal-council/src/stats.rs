//! Population statistics over FP rates.
//!
//! All functions return `None` for an empty slice instead of dividing by zero.

/// Standard deviations below this are treated as zero.
pub const SIGMA_EPSILON: f64 = 1e-12;

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`, not `n - 1`).
pub fn population_std_dev(values: &[f64]) -> Option<f64> {
    let mu = mean(values)?;
    let variance = values.iter().map(|x| (x - mu).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Coefficient of variation σ/μ. Zero when the mean is zero.
pub fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    let mu = mean(values)?;
    let sigma = population_std_dev(values)?;
    if mu.abs() <= SIGMA_EPSILON {
        return Some(0.0);
    }
    Some(sigma / mu.abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_inputs() {
        assert!(mean(&[]).is_none());
        assert!(population_std_dev(&[]).is_none());
        assert!(coefficient_of_variation(&[]).is_none());
    }

    #[test]
    fn test_population_std_dev() {
        // Classic example: σ = 2.0
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&values).unwrap() - 5.0).abs() < 1e-12);
        assert!((population_std_dev(&values).unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_coefficient_of_variation() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((coefficient_of_variation(&values).unwrap() - 0.4).abs() < 1e-12);
        assert_eq!(coefficient_of_variation(&[0.0, 0.0]).unwrap(), 0.0);
    }
}
