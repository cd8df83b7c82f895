//! Plot rendering with Plotters: reporting sinks over the computed
//! aggregates. Nothing here feeds back into the analysis.

use std::error::Error;
use std::path::{Path, PathBuf};

use plotters::prelude::*;

use crate::data::Gate;
use crate::descriptive::DescriptiveReport;
use crate::error::{AnalysisError, Result};
use crate::predict::RocCurve;
use crate::survival::SurvivalReport;

const ARM_COLORS: [RGBColor; 2] = [BLUE, RED];

fn arm_color(gate: Gate) -> RGBColor {
    match gate {
        Gate::Gate30 => ARM_COLORS[0],
        Gate::Gate40 => ARM_COLORS[1],
    }
}

fn plot_err(e: Box<dyn Error>) -> AnalysisError {
    AnalysisError::Plot(e.to_string())
}

/// Render every plot the pipeline produces into `dir`.
pub fn render_all(
    dir: &str,
    descriptive: &DescriptiveReport,
    survival: &SurvivalReport,
    roc: &RocCurve,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let dir = Path::new(dir);

    let histogram = dir.join("rounds_histogram.png");
    let retention = dir.join("retention_by_gate.png");
    let curves = dir.join("survival_curves.png");
    let roc_path = dir.join("roc_curve.png");

    rounds_histogram(descriptive, &histogram).map_err(plot_err)?;
    retention_bars(descriptive, &retention).map_err(plot_err)?;
    survival_curves(survival, &curves).map_err(plot_err)?;
    roc_curve(roc, &roc_path).map_err(plot_err)?;

    let paths = vec![histogram, retention, curves, roc_path];
    for path in &paths {
        log::info!("wrote {}", path.display());
    }
    Ok(paths)
}

fn rounds_histogram(
    report: &DescriptiveReport,
    path: &Path,
) -> std::result::Result<(), Box<dyn Error>> {
    let bins = &report.rounds_histogram;
    let x_max = bins.last().map_or(1.0, |b| b.end);
    let x_min = bins.first().map_or(0.0, |b| b.start);
    let y_max = bins.iter().map(|b| b.count).max().unwrap_or(1) as f64;

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Game rounds played (post-filter)", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, 0.0..y_max * 1.1)?;

    chart
        .configure_mesh()
        .x_desc("Rounds played in first 14 days")
        .y_desc("Users")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart.draw_series(bins.iter().map(|bin| {
        Rectangle::new(
            [(bin.start, 0.0), (bin.end, bin.count as f64)],
            BLUE.mix(0.5).filled(),
        )
    }))?;

    root.present()?;
    Ok(())
}

fn retention_bars(
    report: &DescriptiveReport,
    path: &Path,
) -> std::result::Result<(), Box<dyn Error>> {
    let root = BitMapBackend::new(path, (700, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let y_max = report
        .arms
        .iter()
        .flat_map(|a| [a.day1_retention, a.day7_retention])
        .fold(0.0_f64, f64::max);

    let mut chart = ChartBuilder::on(&root)
        .caption("Retention by gate placement", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..4.0, 0.0..y_max * 1.2)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(4)
        .x_label_formatter(&|x| match *x as usize {
            0 => "d1/gate_30".to_string(),
            1 => "d1/gate_40".to_string(),
            2 => "d7/gate_30".to_string(),
            _ => "d7/gate_40".to_string(),
        })
        .y_desc("Retention rate")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (slot, arm) in report.arms.iter().enumerate() {
        let color = arm_color(arm.gate);
        chart.draw_series(std::iter::once(Rectangle::new(
            [
                (slot as f64 + 0.1, 0.0),
                (slot as f64 + 0.9, arm.day1_retention),
            ],
            color.mix(0.6).filled(),
        )))?;
        chart.draw_series(std::iter::once(Rectangle::new(
            [
                (slot as f64 + 2.1, 0.0),
                (slot as f64 + 2.9, arm.day7_retention),
            ],
            color.mix(0.6).filled(),
        )))?;
    }

    root.present()?;
    Ok(())
}

fn survival_curves(
    report: &SurvivalReport,
    path: &Path,
) -> std::result::Result<(), Box<dyn Error>> {
    let x_max = report
        .curves
        .iter()
        .flat_map(|c| c.times.last().copied())
        .max()
        .unwrap_or(1);

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Kaplan-Meier survival by gate", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..f64::from(x_max) * 1.02, 0.0..1.02)?;

    chart
        .configure_mesh()
        .x_desc("Rounds played")
        .y_desc("P(still active)")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for curve in &report.curves {
        let color = arm_color(curve.gate);
        let mut points = vec![(0.0, 1.0)];
        let mut previous = 1.0;
        for (&t, &s) in curve.times.iter().zip(&curve.survival) {
            points.push((f64::from(t), previous));
            points.push((f64::from(t), s));
            previous = s;
        }
        points.push((f64::from(x_max), previous));

        chart
            .draw_series(LineSeries::new(points, &color))?
            .label(curve.gate.label())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart.configure_series_labels().border_style(BLACK).draw()?;
    root.present()?;
    Ok(())
}

fn roc_curve(roc: &RocCurve, path: &Path) -> std::result::Result<(), Box<dyn Error>> {
    let root = BitMapBackend::new(path, (600, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("ROC curve (AUC = {:.3})", roc.auc),
            ("sans-serif", 30),
        )
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..1.0, 0.0..1.0)?;

    chart
        .configure_mesh()
        .x_desc("False positive rate")
        .y_desc("True positive rate")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    // Chance diagonal for reference.
    chart.draw_series(LineSeries::new(
        vec![(0.0, 0.0), (1.0, 1.0)],
        BLACK.mix(0.3),
    ))?;

    chart.draw_series(LineSeries::new(
        roc.points
            .iter()
            .map(|p| (p.false_positive_rate, p.true_positive_rate)),
        &RED,
    ))?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Cohort, UserRecord};
    use crate::predict::RocCurve;
    use crate::{descriptive, survival};
    use tempfile::tempdir;

    fn test_cohort() -> Cohort {
        let rows = (0..20)
            .map(|i| UserRecord {
                user_id: i,
                gate: if i % 2 == 0 { Gate::Gate30 } else { Gate::Gate40 },
                rounds_played: (i as u32 + 1) * 3,
                retained_day1: i % 2 == 0,
                retained_day7: i % 3 == 0,
            })
            .collect();
        Cohort { rows }
    }

    #[test]
    fn renders_all_plots() {
        let cohort = test_cohort();
        let descriptive = descriptive::describe(&cohort).unwrap();
        let survival = survival::analyze_survival(&cohort).unwrap();
        let truth: Vec<f64> = cohort.rows.iter().map(|r| r.day7()).collect();
        let scores: Vec<f64> = cohort
            .rows
            .iter()
            .map(|r| f64::from(r.rounds_played) / 100.0)
            .collect();
        let roc = RocCurve::compute(&truth, &scores).unwrap();

        let dir = tempdir().unwrap();
        let paths = render_all(
            dir.path().to_str().unwrap(),
            &descriptive,
            &survival,
            &roc,
        )
        .unwrap();

        assert_eq!(paths.len(), 4);
        for path in paths {
            assert!(path.exists(), "{} missing", path.display());
        }
    }
}
