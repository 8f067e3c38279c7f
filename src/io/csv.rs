/*!
# Histogram Export as Tab-Separated Values

One row per bin: the lower edge of the bin, the (averaged) bin value, its error bar and,
when available, the error bar obtained from the spread across tasks. Values are written in
scientific notation with ten digits after the decimal point. Enable via the `csv` feature.

```rust
use mini_mhrw::histogram::{HistogramParams, HistogramWithErrorBars};
use mini_mhrw::io::csv::write_histogram_csv;

let mut hist = HistogramWithErrorBars::new(HistogramParams::new(0.0, 1.0, 2));
hist.bins[0] = 0.25;
let mut out = Vec::new();
write_histogram_csv(&mut out, &hist, None)?;
let text = String::from_utf8(out).unwrap();
assert_eq!(text.lines().next(), Some("Value\tCounts\tError"));
assert_eq!(
    text.lines().nth(1),
    Some("0.0000000000e+00\t2.5000000000e-01\t0.0000000000e+00")
);
# Ok::<(), mini_mhrw::MhrwError>(())
```
*/

use ndarray::Array1;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use csv::WriterBuilder;

use crate::error::{MhrwError, Result};
use crate::histogram::HistogramWithErrorBars;

const PRECISION: usize = 10;

/// Formats `v` like C's `%.10e`: the exponent carries a sign and at least two digits.
pub fn fmt_scientific(v: f64) -> String {
    let s = format!("{:.*e}", PRECISION, v);
    match s.split_once('e') {
        Some((mantissa, exp)) => match exp.parse::<i32>() {
            Ok(e) => format!(
                "{}e{}{:02}",
                mantissa,
                if e < 0 { '-' } else { '+' },
                e.unsigned_abs()
            ),
            Err(_) => s.clone(),
        },
        // inf and NaN
        None => s,
    }
}

/**
Writes `hist` as a tab-separated table to `writer`.

The header is `Value\tCounts\tError`, followed by `\tSimpleError` when `simple_errors` is
given; `simple_errors` must then have one entry per bin.
*/
pub fn write_histogram_csv<W: Write>(
    writer: W,
    hist: &HistogramWithErrorBars,
    simple_errors: Option<&Array1<f64>>,
) -> Result<()> {
    if let Some(errors) = simple_errors {
        if errors.len() != hist.num_bins() {
            return Err(MhrwError::StatsCollector(format!(
                "got {} simple error bars for {} bins",
                errors.len(),
                hist.num_bins()
            )));
        }
    }

    let mut wtr = WriterBuilder::new().delimiter(b'\t').from_writer(writer);

    let mut header = vec!["Value", "Counts", "Error"];
    if simple_errors.is_some() {
        header.push("SimpleError");
    }
    wtr.write_record(&header)?;

    for k in 0..hist.num_bins() {
        let mut row = vec![
            fmt_scientific(hist.params.bin_lower_value(k)),
            fmt_scientific(hist.bins[k]),
            fmt_scientific(hist.delta[k]),
        ];
        if let Some(errors) = simple_errors {
            row.push(fmt_scientific(errors[k]));
        }
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Saves `hist` to the file `filename`, see [`write_histogram_csv`].
pub fn save_histogram_csv<P: AsRef<Path>>(
    filename: P,
    hist: &HistogramWithErrorBars,
    simple_errors: Option<&Array1<f64>>,
) -> Result<()> {
    write_histogram_csv(File::create(filename)?, hist, simple_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::HistogramParams;
    use ndarray::arr1;
    use std::fs;
    use tempfile::NamedTempFile;

    fn sample_hist() -> HistogramWithErrorBars {
        HistogramWithErrorBars {
            params: HistogramParams::new(0.5, 1.0, 2),
            bins: arr1(&[0.75, 0.125]),
            delta: arr1(&[0.01, 0.002]),
            off_chart: 0.125,
        }
    }

    #[test]
    fn test_fmt_scientific_matches_c_style() {
        assert_eq!(fmt_scientific(0.0), "0.0000000000e+00");
        assert_eq!(fmt_scientific(1234.5), "1.2345000000e+03");
        assert_eq!(fmt_scientific(-0.002), "-2.0000000000e-03");
        assert_eq!(fmt_scientific(1e-120), "1.0000000000e-120");
        assert_eq!(fmt_scientific(f64::NAN), "NaN");
    }

    #[test]
    fn test_save_histogram_with_simple_errors() {
        let file = NamedTempFile::new().unwrap();
        let simple = arr1(&[0.02, 0.003]);
        save_histogram_csv(file.path(), &sample_hist(), Some(&simple)).unwrap();

        let contents = fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Value\tCounts\tError\tSimpleError");
        assert_eq!(
            lines[1],
            "5.0000000000e-01\t7.5000000000e-01\t1.0000000000e-02\t2.0000000000e-02"
        );
        assert_eq!(
            lines[2],
            "7.5000000000e-01\t1.2500000000e-01\t2.0000000000e-03\t3.0000000000e-03"
        );
    }

    #[test]
    fn test_mismatched_simple_errors_are_rejected() {
        let mut out = Vec::new();
        let simple = arr1(&[0.02]);
        assert!(write_histogram_csv(&mut out, &sample_hist(), Some(&simple)).is_err());
        assert!(out.is_empty());
    }
}
