//! Plain-text dataset formats.
//!
//! Every line holds one point: the target first, then the features. Sparse
//! lines list `key:value` pairs, dense lines list every value in key order.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use super::{Dataset, Point};
use crate::error::{Error, Result};

/// Output layout for [`Dataset::write`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextFormat {
    /// `target key:value ...` with 0-based keys; zero values are omitted.
    Sparse,
    /// Like [`Sparse`](Self::Sparse) but with 1-based keys (SVMlight).
    SparseOneBased,
    /// `target v0 v1 ...` separated by the given delimiter.
    Dense(char),
}

impl Dataset {
    /// Loads a space-delimited file, see [`read`](Self::read).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and [`Error::Parse`]
    /// on a malformed line.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_delimiter(path, ' ')
    }

    /// Loads a file whose tokens are separated by `delimiter`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and [`Error::Parse`]
    /// on a malformed line.
    pub fn load_with_delimiter(path: impl AsRef<Path>, delimiter: char) -> Result<Self> {
        let file = File::open(path)?;
        Self::read(BufReader::new(file), delimiter)
    }

    /// Parses points from a reader.
    ///
    /// The first non-blank line decides the layout: if it contains a `:` the
    /// whole input is sparse and the key universe is one past the largest
    /// key, otherwise it is dense and the universe is the widest row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on a read failure and [`Error::Parse`] on a
    /// malformed number, a missing target, or unsorted sparse keys.
    pub fn read(reader: impl BufRead, delimiter: char) -> Result<Self> {
        let mut sparse = None;
        let mut num_values = 0;
        let mut points = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let number = index + 1;
            let mut tokens = line
                .split(delimiter)
                .map(str::trim)
                .filter(|token| !token.is_empty());
            let Some(first) = tokens.next() else {
                continue;
            };
            let is_sparse = *sparse.get_or_insert_with(|| line.contains(':'));
            let target = parse_number::<f64>(first, number)?;

            let point = if is_sparse {
                let mut keys = Vec::new();
                let mut values = Vec::new();
                for token in tokens {
                    let (key, value) = token.split_once(':').ok_or_else(|| Error::Parse {
                        line: number,
                        message: format!("expected key:value, found '{token}'"),
                    })?;
                    keys.push(parse_number::<usize>(key, number)?);
                    values.push(parse_number::<f64>(value, number)?);
                }
                Point::sparse(target, keys, values).map_err(|e| Error::Parse {
                    line: number,
                    message: e.to_string(),
                })?
            } else {
                let values = tokens
                    .map(|token| parse_number::<f64>(token, number))
                    .collect::<Result<Vec<_>>>()?;
                Point::dense(target, values)
            };

            if let Some(key) = point.max_key() {
                num_values = num_values.max(key + 1);
            }
            points.push(point);
        }

        Self::with_points(num_values, points)
    }

    /// Writes all points in the given layout.
    ///
    /// Dense output pads every row to [`num_values`](Self::num_values)
    /// columns.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if writing fails.
    pub fn write(&self, mut writer: impl Write, format: TextFormat) -> io::Result<()> {
        for point in &self.points {
            write!(writer, "{}", point.target())?;
            match format {
                TextFormat::Sparse | TextFormat::SparseOneBased => {
                    let offset = usize::from(format == TextFormat::SparseOneBased);
                    for (key, value) in point.entries().filter(|&(_, v)| v != 0.0) {
                        write!(writer, " {}:{value}", key + offset)?;
                    }
                }
                TextFormat::Dense(delimiter) => {
                    for key in 0..self.num_values {
                        write!(writer, "{delimiter}{}", point.value(key))?;
                    }
                }
            }
            writeln!(writer)?;
        }
        writer.flush()
    }

    /// Writes all points to a file, replacing it if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be created or written.
    pub fn save(&self, path: impl AsRef<Path>, format: TextFormat) -> Result<()> {
        let file = File::create(path)?;
        self.write(BufWriter::new(file), format)?;
        Ok(())
    }
}

fn parse_number<T: core::str::FromStr>(token: &str, line: usize) -> Result<T>
where
    T::Err: core::fmt::Display,
{
    token.parse().map_err(|e: T::Err| Error::Parse {
        line,
        message: format!("'{token}': {e}"),
    })
}
