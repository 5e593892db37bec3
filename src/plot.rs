// Horizontal bar chart of the forest's feature importances.
use std::error::Error;
use std::path::Path;

use plotters::prelude::*;

/// Draws the `top` most important features and saves the chart as a PNG at `path`.
/// `results` must already be sorted, most important first.
pub fn plot_importances(path: &Path, results: &[(String, f64)], top: usize) -> Result<(), Box<dyn Error>> {
    let shown = &results[..results.len().min(top)];
    let names: Vec<&str> = shown.iter().map(|(n, _)| n.as_str()).collect();
    let values: Vec<f64> = shown.iter().map(|(_, v)| *v).collect();
    let count = shown.len();

    let max_x = values.iter().cloned().fold(0.0_f64, f64::max).max(1e-6);
    let x_range = 0.0..max_x * 1.1;

    let root = BitMapBackend::new(path, (1000, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Layout model feature importances", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(220)
        .build_cartesian_2d(x_range, 0..count)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .y_labels(count)
        .y_label_formatter(&|idx| names.get(*idx).map(|n| n.to_string()).unwrap_or_default())
        .x_desc("Share of impurity decrease")
        .y_desc("Feature")
        .draw()?;

    chart.draw_series(
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| Rectangle::new([(0.0, i), (v, i + 1)], BLUE.mix(0.5).filled())),
    )?;

    root.present()?;
    log::info!("Wrote feature importance chart to {}", path.display());
    Ok(())
}
