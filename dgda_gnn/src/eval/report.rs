use crate::error::{DgdaError, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Evaluation outcome of one source -> target run.
#[derive(Clone, Debug, PartialEq)]
pub struct BenchmarkResult {
    pub model: String,
    pub source: String,
    pub target: String,
    pub micro_f1: f64,
    pub macro_f1: f64,
    pub auc: f64,
}

impl BenchmarkResult {
    /// `dgda,source,<SRC>,target,<TGT>,micro-f1,<F>,macro-f1,<F>,auc,<F>`
    ///
    /// Floats are written by [`format_float`].
    pub fn to_line(&self) -> String {
        format!(
            "{},source,{},target,{},micro-f1,{},macro-f1,{},auc,{}",
            self.model,
            self.source,
            self.target,
            format_float(self.micro_f1),
            format_float(self.macro_f1),
            format_float(self.auc)
        )
    }

    /// Appends the result line to `path`, creating the file if needed.
    pub fn append_to(&self, path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| DgdaError::io(path, e))?;
        writeln!(file, "{}", self.to_line()).map_err(|e| DgdaError::io(path, e))
    }
}

/// Shortest round-trip text of `value`: positional with a decimal point for
/// decimal exponents in `-4..16`, otherwise scientific with a signed exponent
/// of at least two digits (`0.0`, `0.8125`, `1e-05`, `1.5e+16`).
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let scientific = format!("{value:e}");
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };
    if (-4..16).contains(&exponent) {
        return format!("{value:?}");
    }
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.abs())
}
