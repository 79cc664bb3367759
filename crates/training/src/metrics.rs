use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("no rows to score")]
    Empty,

    #[error("{actual} targets but {predicted} predictions")]
    LengthMismatch { actual: usize, predicted: usize },

    #[error("non-finite prediction at row {0}")]
    NonFinite(usize),
}

/// Fit quality of one model on its training rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub mae: f64,
    /// `None` when every target is zero.
    pub mape: Option<f64>,
    /// `None` when the target has zero variance.
    pub r2: Option<f64>,
}

/// Computes MAE, MAPE and R².
///
/// MAPE skips rows whose target is zero.
///
/// # Errors
/// Fails on empty input, mismatched lengths, or a non-finite prediction.
pub fn calculate(actual: &[f64], predicted: &[f64]) -> Result<Metrics, MetricsError> {
    if actual.len() != predicted.len() {
        return Err(MetricsError::LengthMismatch {
            actual: actual.len(),
            predicted: predicted.len(),
        });
    }
    if actual.is_empty() {
        return Err(MetricsError::Empty);
    }
    if let Some(row) = predicted.iter().position(|p| !p.is_finite()) {
        return Err(MetricsError::NonFinite(row));
    }

    #[allow(clippy::cast_precision_loss)]
    let n = actual.len() as f64;
    let pairs = || actual.iter().zip(predicted);

    let mae = pairs().map(|(y, p)| (y - p).abs()).sum::<f64>() / n;

    let (ape_sum, ape_rows) = pairs()
        .filter(|(y, _)| **y != 0.0)
        .fold((0.0, 0_usize), |(sum, rows), (y, p)| {
            (sum + ((y - p) / y).abs(), rows + 1)
        });
    #[allow(clippy::cast_precision_loss)]
    let mape = (ape_rows > 0).then(|| ape_sum / ape_rows as f64);

    let mean = actual.iter().sum::<f64>() / n;
    let ss_res: f64 = pairs().map(|(y, p)| (y - p).powi(2)).sum();
    let ss_tot: f64 = actual.iter().map(|y| (y - mean).powi(2)).sum();
    let r2 = (ss_tot != 0.0).then(|| 1.0 - ss_res / ss_tot);

    Ok(Metrics { mae, mape, r2 })
}
