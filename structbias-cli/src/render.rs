//! Heatmaps and contrast bar charts drawn with plotters into SVG files.

use std::path::Path;

use nalgebra::DMatrix;
use plotters::prelude::*;
use structbias_core::export::{ContrastTable, RenderError};
use structbias_core::{BarChartRenderer, HeatmapRenderer};

const CELL: u32 = 28;
const LABEL_AREA: u32 = 60;
const BAR_GROUP_WIDTH: u32 = 90;

/// Writes standalone SVG documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct SvgRenderer;

impl HeatmapRenderer for SvgRenderer {
    fn heatmap(
        &self,
        title: &str,
        labels: &[String],
        matrix: &DMatrix<f64>,
        output: &Path,
    ) -> Result<(), RenderError> {
        let n = matrix.nrows();
        if n == 0 || matrix.ncols() != n || labels.len() != n {
            return Err(format!(
                "heatmap needs a non-empty square matrix with one label per row, got {}x{} and {} labels",
                n,
                matrix.ncols(),
                labels.len()
            )
            .into());
        }

        let side = (CELL * n as u32 + 2 * LABEL_AREA).max(320);
        let root = SVGBackend::new(output, (side, side + 30)).into_drawing_area();
        root.fill(&WHITE).map_err(|e| format!("backend error: {e}"))?;

        {
            // Cells are centred on integer coordinates; row 0 is drawn at the top
            let extent = n as f64 - 0.5;
            let mut chart = ChartBuilder::on(&root)
                .margin(10)
                .caption(title, ("sans-serif", 18.0))
                .set_label_area_size(LabelAreaPosition::Left, LABEL_AREA)
                .set_label_area_size(LabelAreaPosition::Bottom, LABEL_AREA)
                .build_cartesian_2d(-0.5..extent, -0.5..extent)
                .map_err(|e| format!("chart build error: {e}"))?;

            let column_label = |value: &f64| grid_label(labels, *value, Some);
            let row_label = |value: &f64| grid_label(labels, *value, |index| (n - 1).checked_sub(index));
            chart
                .configure_mesh()
                .disable_mesh()
                .x_labels(n)
                .y_labels(n)
                .x_label_formatter(&column_label)
                .y_label_formatter(&row_label)
                .draw()
                .map_err(|e| format!("mesh error: {e}"))?;

            let cells = (0..n).flat_map(|row| (0..n).map(move |col| (row, col)));
            chart
                .draw_series(cells.map(|(row, col)| {
                    let x = col as f64;
                    let y = (n - 1 - row) as f64;
                    Rectangle::new(
                        [(x - 0.5, y - 0.5), (x + 0.5, y + 0.5)],
                        diverging_colour(matrix[(row, col)]).filled(),
                    )
                }))
                .map_err(|e| format!("draw error: {e}"))?;
        }

        root.present().map_err(|e| format!("render error: {e}"))?;
        Ok(())
    }
}

impl BarChartRenderer for SvgRenderer {
    fn bar_chart(
        &self,
        title: &str,
        table: &ContrastTable,
        palette: &[&str],
        output: &Path,
    ) -> Result<(), RenderError> {
        if palette.is_empty() {
            return Err("empty palette".into());
        }
        let colours = palette
            .iter()
            .map(|hex| hex_colour(hex))
            .collect::<Result<Vec<_>, _>>()?;

        let categories = table.categories();
        let mut components: Vec<&str> = Vec::new();
        for row in &table.rows {
            if !components.contains(&row.component.as_str()) {
                components.push(&row.component);
            }
        }
        if components.is_empty() {
            return Err("contrast table has no rows".into());
        }

        // bars[component][category] = (mean, standard error)
        let bars: Vec<Vec<(f64, f64)>> = components
            .iter()
            .map(|component| {
                categories
                    .iter()
                    .map(|category| {
                        let values: Vec<f64> = table
                            .rows
                            .iter()
                            .filter(|row| row.component == *component && row.category == *category)
                            .map(|row| row.value)
                            .collect();
                        mean_and_error(&values)
                    })
                    .collect()
            })
            .collect();

        // Symmetric scale around zero so negative contrasts stay visible
        let extent = bars
            .iter()
            .flatten()
            .map(|(mean, error)| mean.abs() + error)
            .fold(0.0_f64, f64::max)
            .max(1e-6);
        let slots = categories.len() + 1;
        let width = components.len() as f64 * slots as f64;

        let size = (BAR_GROUP_WIDTH * components.len() as u32 + 260, 420);
        let root = SVGBackend::new(output, size).into_drawing_area();
        root.fill(&WHITE).map_err(|e| format!("backend error: {e}"))?;

        {
            let mut chart = ChartBuilder::on(&root)
                .margin(10)
                .caption(title, ("sans-serif", 18.0))
                .set_label_area_size(LabelAreaPosition::Left, LABEL_AREA)
                .build_cartesian_2d(0.0..width, -1.25 * extent..1.1 * extent)
                .map_err(|e| format!("chart build error: {e}"))?;

            chart
                .configure_mesh()
                .disable_x_mesh()
                .disable_x_axis()
                .y_desc("contrast")
                .draw()
                .map_err(|e| format!("mesh error: {e}"))?;

            chart
                .draw_series(LineSeries::new([(0.0, 0.0), (width, 0.0)], &BLACK))
                .map_err(|e| format!("draw error: {e}"))?;

            for (slot, category) in categories.iter().enumerate() {
                let colour = colours[slot % colours.len()];
                let bar = |group: usize, mean: f64| {
                    let left = (group * slots + slot) as f64 + 0.5;
                    Rectangle::new([(left, 0.0), (left + 1.0, mean)], colour.filled())
                };
                chart
                    .draw_series(bars.iter().enumerate().map(|(group, means)| bar(group, means[slot].0)))
                    .map_err(|e| format!("draw error: {e}"))?
                    .label(*category)
                    .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], colour.filled()));

                chart
                    .draw_series(bars.iter().enumerate().map(|(group, means)| {
                        let (mean, error) = means[slot];
                        let centre = (group * slots + slot) as f64 + 1.0;
                        ErrorBar::new_vertical(centre, mean - error, mean, mean + error, BLACK.filled(), 6)
                    }))
                    .map_err(|e| format!("draw error: {e}"))?;
            }

            chart
                .draw_series(components.iter().enumerate().map(|(group, component)| {
                    let left = (group * slots) as f64 + 0.5;
                    Text::new(component.to_string(), (left, -1.1 * extent), ("sans-serif", 13.0).into_font())
                }))
                .map_err(|e| format!("draw error: {e}"))?;

            chart
                .configure_series_labels()
                .position(SeriesLabelPosition::UpperRight)
                .background_style(WHITE.mix(0.8))
                .border_style(&BLACK)
                .draw()
                .map_err(|e| format!("legend error: {e}"))?;
        }

        root.present().map_err(|e| format!("render error: {e}"))?;
        Ok(())
    }
}

/// Label of the grid cell centred on `value`, empty between cells.
fn grid_label(labels: &[String], value: f64, index: impl Fn(usize) -> Option<usize>) -> String {
    let rounded = value.round();
    if (value - rounded).abs() > 1e-6 || rounded < 0.0 {
        return String::new();
    }
    index(rounded as usize)
        .and_then(|i| labels.get(i))
        .cloned()
        .unwrap_or_default()
}

fn mean_and_error(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, (variance / n).sqrt())
}

/// Blue for -1, white for 0, red for +1.
fn diverging_colour(value: f64) -> RGBColor {
    let v = if value.is_finite() { value.clamp(-1.0, 1.0) } else { 0.0 };
    let fade = (255.0 * (1.0 - v.abs())).round() as u8;
    if v >= 0.0 {
        RGBColor(255, fade, fade)
    } else {
        RGBColor(fade, fade, 255)
    }
}

/// Parse `#rrggbb`.
fn hex_colour(hex: &str) -> Result<RGBColor, RenderError> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    let channel = |range: std::ops::Range<usize>| {
        digits
            .get(range)
            .and_then(|pair| u8::from_str_radix(pair, 16).ok())
    };
    match (digits.len(), channel(0..2), channel(2..4), channel(4..6)) {
        (6, Some(r), Some(g), Some(b)) => Ok(RGBColor(r, g, b)),
        _ => Err(format!("invalid palette colour {hex:?}").into()),
    }
}
