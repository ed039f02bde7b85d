use super::Workspace;
use crate::output::{self, OutputMode, pretty_kv, pretty_section};
use anyhow::{Context as _, Result};
use clap::Args;
use std::io::{self, Write};
use variance_core::histogram::Histogram;
use variance_core::model::{Range, SetId, WitnessId};
use variance_core::task::TaskStatus;

const BAR_WIDTH: usize = 24;

#[derive(Args, Debug)]
pub struct HistogramArgs {
    #[arg(long)]
    pub set: i64,

    #[arg(long)]
    pub base: i64,
}

/// Execute `vr histogram`. Text output shows one bar per base line, scaled
/// by the line's mean difference density.
pub fn run_histogram(args: &HistogramArgs, workspace: &Workspace, mode: OutputMode) -> Result<()> {
    let engine = workspace.engine()?;
    let set = SetId(args.set);
    let base = WitnessId(args.base);
    let histogram = engine
        .histogram(set, base, &TaskStatus::new())
        .with_context(|| format!("Failed to build histogram for set {set}"))?;

    let text = if mode.is_json() {
        String::new()
    } else {
        let len = engine.store().text_len(base)?;
        engine.store().read(base, Range { start: 0, end: len })?
    };

    output::render(mode, &histogram, |histogram, w| {
        if mode.is_pretty() {
            pretty_section(w, &format!("Histogram of set {} against {}", histogram.set, histogram.base))?;
            pretty_kv(w, "witnesses", histogram.witness_count.to_string())?;
            pretty_kv(w, "peak", format!("{:.2}", histogram.peak()))?;
            writeln!(w)?;
        }
        write_lines(w, histogram, &text)
    })
}

/// Mean density of each line of `text`, paired with the line.
#[allow(clippy::cast_precision_loss)]
fn line_densities<'t>(histogram: &Histogram, text: &'t str) -> Vec<(f64, &'t str)> {
    let mut offset = 0;
    text.split('\n')
        .map(|line| {
            let len = line.chars().count();
            let values = histogram.values.get(offset..offset + len).unwrap_or(&[]);
            offset += len + 1;
            let mean = if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            };
            (mean, line)
        })
        .collect()
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn write_lines(w: &mut dyn Write, histogram: &Histogram, text: &str) -> io::Result<()> {
    for (number, (mean, line)) in line_densities(histogram, text).into_iter().enumerate() {
        let filled = ((mean * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);
        writeln!(
            w,
            "{:>4} {:<width$} {:.2}  {line}",
            number + 1,
            "#".repeat(filled),
            mean,
            width = BAR_WIDTH
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn histogram(values: Vec<f64>) -> Histogram {
        Histogram {
            set: SetId(1),
            base: WitnessId(1),
            witness_count: 2,
            values,
        }
    }

    #[test]
    fn lines_average_their_own_characters() {
        let h = histogram(vec![1.0, 0.0, 0.0, 0.5, 0.5]);
        let lines = line_densities(&h, "ab\ncd");
        assert_eq!(lines, vec![(0.5, "ab"), (0.5, "cd")]);
    }

    #[test]
    fn empty_lines_read_zero() {
        let h = histogram(vec![0.0, 1.0]);
        let lines = line_densities(&h, "\na");
        assert_eq!(lines, vec![(0.0, ""), (1.0, "a")]);
    }

    #[test]
    fn bars_are_scaled_to_width() {
        let h = histogram(vec![1.0, 1.0]);
        let mut out = Vec::new();
        write_lines(&mut out, &h, "ab").expect("write");
        let rendered = String::from_utf8(out).expect("utf8");
        assert!(rendered.starts_with(&format!("   1 {} 1.00  ab", "#".repeat(BAR_WIDTH))));
    }
}
