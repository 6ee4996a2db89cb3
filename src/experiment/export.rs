use super::Report;

/// CSV header of [`Report::to_csv`].
pub const CSV_HEADER: &str = "Accuracy(mean),Accuracy(sd),Rank(mean),Rank(sd),Time in ms";

impl Report {
    /// Write one row per step in CSV format.
    ///
    /// Columns: mean and sample standard deviation of the best accuracy,
    /// mean and sample standard deviation of the best rank, then the mean
    /// elapsed milliseconds. The time cell is empty for steps no repetition
    /// searched at.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if writing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use transfer_smbo::dataset::{Dataset, Point};
    /// use transfer_smbo::experiment::{Experiment, ExperimentConfig, SurrogateKind};
    ///
    /// let target = Dataset::with_points(
    ///     1,
    ///     (0..4).map(|i| Point::dense(f64::from(i), vec![f64::from(i)])),
    /// )
    /// .unwrap();
    /// let config = ExperimentConfig::builder()
    ///     .tries(2)
    ///     .surrogate(SurrogateKind::Gp)
    ///     .build();
    /// let report = Experiment::new(config, Vec::new(), target).unwrap().run().unwrap();
    ///
    /// let mut buf = Vec::new();
    /// report.to_csv(&mut buf).unwrap();
    /// let csv = String::from_utf8(buf).unwrap();
    /// assert!(csv.starts_with("Accuracy(mean)"));
    /// assert_eq!(csv.lines().count(), 3);
    /// ```
    pub fn to_csv(&self, mut writer: impl std::io::Write) -> std::io::Result<()> {
        writeln!(writer, "{CSV_HEADER}")?;
        for step in &self.steps {
            write!(
                writer,
                "{},{},{},{},",
                step.accuracy_mean, step.accuracy_std, step.rank_mean, step.rank_std
            )?;
            if let Some(ms) = step.mean_time_ms {
                write!(writer, "{ms}")?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }

    /// Export the report to a CSV file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created or written.
    pub fn export_csv(&self, path: impl AsRef<std::path::Path>) -> std::io::Result<()> {
        let file = std::fs::File::create(path)?;
        self.to_csv(std::io::BufWriter::new(file))
    }
}

#[cfg(feature = "serde")]
impl Report {
    /// Write the per-step summaries as a pretty-printed JSON array.
    /// Requires the `serde` feature.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if serialization or writing fails.
    pub fn to_json(&self, writer: impl std::io::Write) -> std::io::Result<()> {
        serde_json::to_writer_pretty(writer, &self.steps).map_err(std::io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::super::StepSummary;
    use super::*;

    fn report() -> Report {
        Report {
            steps: vec![
                StepSummary {
                    step: 1,
                    accuracy_mean: 0.5,
                    accuracy_std: 0.25,
                    rank_mean: 3.0,
                    rank_std: 1.0,
                    mean_time_ms: Some(2.5),
                },
                StepSummary {
                    step: 2,
                    accuracy_mean: 1.0,
                    accuracy_std: 0.0,
                    rank_mean: 1.0,
                    rank_std: 0.0,
                    mean_time_ms: None,
                },
            ],
        }
    }

    #[test]
    fn csv_rows() {
        let mut buf = Vec::new();
        report().to_csv(&mut buf).unwrap();
        let csv = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines, vec![CSV_HEADER, "0.5,0.25,3,1,2.5", "1,0,1,0,"]);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_array() {
        let mut buf = Vec::new();
        report().to_json(&mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(2));
        assert_eq!(value[1]["mean_time_ms"], serde_json::Value::Null);
    }
}
