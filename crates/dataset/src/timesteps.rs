use serde::{Deserialize, Serialize};

/// The declared time axis of a dataset.
///
/// Most volumes are static (`single(0.0)`); time-varying ones declare either
/// an explicit list or a `[from, to]` range walked by `step`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Timesteps {
    values: Vec<f64>,
}

impl Timesteps {
    pub fn single(time: f64) -> Self {
        Self { values: vec![time] }
    }

    pub fn from_values(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            values.push(0.0);
        }
        values.sort_by(f64::total_cmp);
        values.dedup();
        Self { values }
    }

    pub fn range(from: f64, to: f64, step: f64) -> Self {
        assert!(step > 0.0, "timestep range needs a positive step");
        let mut values = Vec::new();
        let mut t = from;
        while t <= to {
            values.push(t);
            t += step;
        }
        Self::from_values(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn first(&self) -> f64 {
        self.values[0]
    }

    pub fn contains(&self, time: f64) -> bool {
        self.values.iter().any(|&t| t == time)
    }
}

impl Default for Timesteps {
    fn default() -> Self {
        Self::single(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range() {
        let ts = Timesteps::range(0.0, 4.0, 2.0);
        assert_eq!(ts.values(), &[0.0, 2.0, 4.0]);
        assert!(ts.contains(2.0));
        assert!(!ts.contains(3.0));
    }

    #[test]
    fn test_empty_defaults_to_zero() {
        let ts = Timesteps::from_values(vec![]);
        assert_eq!(ts.first(), 0.0);
        assert!(ts.contains(0.0));
    }
}
