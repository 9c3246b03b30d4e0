pub struct StatsHelper;

impl StatsHelper {
    /// Centered boxcar average; the window shrinks at the ends.
    pub fn boxcar(samples: &[f64], width: usize, output: &mut [f64]) {
        let half = width / 2;
        for (i, out) in output.iter_mut().enumerate().take(samples.len()) {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(samples.len());
            let window = &samples[lo..hi];
            *out = window.iter().sum::<f64>() / window.len() as f64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxcar_keeps_linear_interior() {
        let samples = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut out = [0.0; 7];
        StatsHelper::boxcar(&samples, 5, &mut out);
        assert_eq!(out[3], 3.0);
        assert_eq!(out[0], 1.0);
    }
}
