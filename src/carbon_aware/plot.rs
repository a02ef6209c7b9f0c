//! 24h carbon intensity chart, rendered as SVG

use crate::carbon_aware::config::PlotConfig;
use crate::carbon_aware::decision::Evaluation;
use crate::error::Result;
use std::path::Path;
use tracing::info;

const MARGIN_LEFT: f64 = 70.0;
const MARGIN_RIGHT: f64 = 170.0;
const MARGIN_TOP: f64 = 30.0;
const MARGIN_BOTTOM: f64 = 50.0;

const GREEN: &str = "#2ca02c";
const RED: &str = "#d62728";
const BLUE: &str = "#1f77b4";
const BLACK: &str = "#000000";

/// Maps data coordinates onto the SVG canvas
struct Canvas {
    width: f64,
    height: f64,
    x_range: (f64, f64),
    y_range: (f64, f64),
}

impl Canvas {
    fn x(&self, hours_before: f64) -> f64 {
        let (lo, hi) = self.x_range;
        MARGIN_LEFT + (hours_before - lo) / (hi - lo) * (self.width - MARGIN_LEFT - MARGIN_RIGHT)
    }

    fn y(&self, ci: f64) -> f64 {
        let (lo, hi) = self.y_range;
        self.height - MARGIN_BOTTOM - (ci - lo) / (hi - lo) * (self.height - MARGIN_TOP - MARGIN_BOTTOM)
    }

    fn plot_right(&self) -> f64 {
        self.width - MARGIN_RIGHT
    }

    fn plot_bottom(&self) -> f64 {
        self.height - MARGIN_BOTTOM
    }
}

/// Render the chart for one evaluation.
///
/// The x axis is hours before the most recent sample, so "now" sits at 0.
pub fn render_svg(eval: &Evaluation, config: &PlotConfig) -> String {
    let stats = &eval.stats;
    let last_hour = eval.hours.iter().copied().max().unwrap_or(0) as f64;
    let first_hour = eval.hours.iter().copied().min().unwrap_or(0) as f64;

    let mut eps = stats.max * 0.05;
    if eps <= 0.0 {
        eps = 1.0;
    }
    let x_lo = if last_hour > first_hour {
        first_hour - last_hour
    } else {
        -1.0
    };

    let canvas = Canvas {
        width: config.width as f64,
        height: config.height as f64,
        x_range: (x_lo, 0.0),
        y_range: (stats.min - eps, stats.max + eps),
    };

    let mut svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\" font-family=\"sans-serif\" font-size=\"12\">\n",
        w = config.width,
        h = config.height
    );
    svg.push_str("  <rect width=\"100%\" height=\"100%\" fill=\"white\"/>\n");

    // Bands
    let left = canvas.x(x_lo);
    let right = canvas.x(0.0);
    let band = |from: f64, to: f64, color: &str, class: &str| {
        format!(
            "  <rect class=\"{class}\" x=\"{:.2}\" y=\"{:.2}\" width=\"{:.2}\" height=\"{:.2}\" fill=\"{color}\" fill-opacity=\"0.3\"/>\n",
            left,
            canvas.y(to),
            right - left,
            (canvas.y(from) - canvas.y(to)).max(0.0)
        )
    };
    svg.push_str(&band(stats.min - eps, stats.mean, GREEN, "band-below"));
    svg.push_str(&band(stats.mean, stats.max + eps, RED, "band-above"));

    // Reference lines
    for (value, color, class) in [
        (stats.max, RED, "ref-max"),
        (stats.min, GREEN, "ref-min"),
        (stats.mean, BLACK, "ref-mean"),
    ] {
        svg.push_str(&format!(
            "  <line class=\"{class}\" x1=\"{:.2}\" y1=\"{y:.2}\" x2=\"{:.2}\" y2=\"{y:.2}\" stroke=\"{color}\" stroke-opacity=\"0.5\" stroke-dasharray=\"2,4\"/>\n",
            left,
            right,
            y = canvas.y(value)
        ));
    }

    // Spline
    let points: Vec<String> = eval
        .trend
        .fine_times
        .iter()
        .zip(&eval.trend.fine_values)
        .map(|(&t, &v)| format!("{:.2},{:.2}", canvas.x(t - last_hour), canvas.y(v)))
        .collect();
    svg.push_str(&format!(
        "  <polyline class=\"trend\" points=\"{}\" fill=\"none\" stroke=\"{BLUE}\" stroke-width=\"1.5\"/>\n",
        points.join(" ")
    ));

    // Samples
    for (&hour, &ci) in eval.hours.iter().zip(&eval.intensities) {
        svg.push_str(&format!(
            "  <circle class=\"sample\" cx=\"{:.2}\" cy=\"{:.2}\" r=\"2.5\" fill=\"{BLUE}\"/>\n",
            canvas.x(hour as f64 - last_hour),
            canvas.y(ci)
        ));
    }

    // Current sample marker
    let (cx, cy) = (canvas.x(0.0), canvas.y(eval.decision.current_ci));
    svg.push_str(&format!(
        "  <g class=\"current\" stroke=\"{BLACK}\" stroke-width=\"2\"><line x1=\"{:.2}\" y1=\"{:.2}\" x2=\"{:.2}\" y2=\"{:.2}\"/><line x1=\"{:.2}\" y1=\"{:.2}\" x2=\"{:.2}\" y2=\"{:.2}\"/></g>\n",
        cx - 7.0, cy - 7.0, cx + 7.0, cy + 7.0, cx - 7.0, cy + 7.0, cx + 7.0, cy - 7.0
    ));

    push_axes(&mut svg, &canvas, x_lo);
    push_legend(&mut svg, &canvas);

    svg.push_str("</svg>\n");
    svg
}

fn push_axes(svg: &mut String, canvas: &Canvas, x_lo: f64) {
    let (bottom, right) = (canvas.plot_bottom(), canvas.plot_right());
    svg.push_str(&format!(
        "  <line x1=\"{MARGIN_LEFT}\" y1=\"{bottom}\" x2=\"{right}\" y2=\"{bottom}\" stroke=\"{BLACK}\"/>\n"
    ));
    svg.push_str(&format!(
        "  <line x1=\"{MARGIN_LEFT}\" y1=\"{MARGIN_TOP}\" x2=\"{MARGIN_LEFT}\" y2=\"{bottom}\" stroke=\"{BLACK}\"/>\n"
    ));

    // x ticks every 6 hours back from now
    let mut tick = 0.0;
    while tick >= x_lo {
        let x = canvas.x(tick);
        svg.push_str(&format!(
            "  <text x=\"{x:.2}\" y=\"{:.2}\" text-anchor=\"middle\">{tick}</text>\n",
            bottom + 16.0
        ));
        tick -= 6.0;
    }

    let (y_lo, y_hi) = canvas.y_range;
    for i in 0..=4 {
        let value = y_lo + (y_hi - y_lo) * i as f64 / 4.0;
        svg.push_str(&format!(
            "  <text x=\"{:.2}\" y=\"{:.2}\" text-anchor=\"end\">{value:.0}</text>\n",
            MARGIN_LEFT - 6.0,
            canvas.y(value) + 4.0
        ));
    }

    svg.push_str(&format!(
        "  <text x=\"{:.2}\" y=\"{:.2}\" text-anchor=\"middle\">Hours before</text>\n",
        (MARGIN_LEFT + right) / 2.0,
        canvas.height - 12.0
    ));
    let mid_y = (MARGIN_TOP + bottom) / 2.0;
    svg.push_str(&format!(
        "  <text x=\"18\" y=\"{mid_y:.2}\" text-anchor=\"middle\" transform=\"rotate(-90 18 {mid_y:.2})\">CO2 intensity gCO2eq/kWh</text>\n"
    ));
}

fn push_legend(svg: &mut String, canvas: &Canvas) {
    let x = canvas.plot_right() + 20.0;
    let entries = [
        (GREEN, "below average"),
        (RED, "above average"),
    ];
    for (i, (color, label)) in entries.iter().enumerate() {
        let y = MARGIN_TOP + 10.0 + i as f64 * 20.0;
        svg.push_str(&format!(
            "  <rect x=\"{x:.2}\" y=\"{:.2}\" width=\"14\" height=\"10\" fill=\"{color}\" fill-opacity=\"0.3\"/>\n  <text x=\"{:.2}\" y=\"{y:.2}\">{label}</text>\n",
            y - 9.0,
            x + 20.0
        ));
    }
}

/// Render the chart and write it to `path`
pub fn write_plot(path: &Path, eval: &Evaluation, config: &PlotConfig) -> Result<()> {
    std::fs::write(path, render_svg(eval, config))?;
    info!("Wrote carbon intensity chart to {}", path.display());
    Ok(())
}
