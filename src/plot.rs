//! I-V charts for a finished sweep: a terminal viewer and a PNG export.
//!
//! Plotting is left to the caller; nothing in the session or sweep code calls
//! into this module. Values are shown in millivolts and microamps.

use std::fs::File;
use std::io::{self, stdout, BufWriter};
use std::path::Path;

use crossterm::{
    event::{self, Event, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageError, Rgb, RgbImage};
use ratatui::{
    backend::CrosstermBackend,
    layout::Rect,
    style::{Color, Style},
    symbols,
    text::Span,
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType},
    Frame, Terminal,
};

use tracing::debug;

use crate::sweep::Sample;

pub const X_LABEL: &str = "Voltage (mV)";
pub const Y_LABEL: &str = "Current (uA)";

pub const PNG_WIDTH: u32 = 1200;
pub const PNG_HEIGHT: u32 = 900;
const PNG_MARGIN: i64 = 60;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const FRAME: Rgb<u8> = Rgb([0, 0, 0]);
const GRID: Rgb<u8> = Rgb([220, 220, 220]);
const ZERO_LINE: Rgb<u8> = Rgb([150, 150, 150]);
pub const TRACE: Rgb<u8> = Rgb([255, 0, 0]);

/// Samples rescaled to (millivolts, microamps).
pub fn scaled_points(samples: &[Sample]) -> Vec<(f64, f64)> {
    samples
        .iter()
        .map(|s| (s.voltage * 1e3, s.current * 1e6))
        .collect()
}

// Axis bounds that never collapse to a single value.
fn bounds(values: impl Iterator<Item = f64>) -> [f64; 2] {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        return [-1.0, 1.0];
    }
    if lo == hi {
        let pad = if lo == 0.0 { 1.0 } else { lo.abs() * 0.1 };
        return [lo - pad, hi + pad];
    }
    [lo, hi]
}

fn axis_labels(range: [f64; 2]) -> Vec<Span<'static>> {
    let mid = (range[0] + range[1]) / 2.0;
    [range[0], mid, range[1]]
        .iter()
        .map(|v| Span::raw(format!("{:.3}", v)))
        .collect()
}

/// Draws the sweep as a red line chart filling `area`.
pub fn draw_sweep_chart(frame: &mut Frame, area: Rect, title: &str, points: &[(f64, f64)]) {
    let x_bounds = bounds(points.iter().map(|p| p.0));
    let y_bounds = bounds(points.iter().map(|p| p.1));

    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(Color::Red))
        .data(points);

    let chart = Chart::new(vec![dataset])
        .block(
            Block::default()
                .title(title.to_string())
                .borders(Borders::ALL),
        )
        .x_axis(
            Axis::default()
                .title(X_LABEL)
                .bounds(x_bounds)
                .labels(axis_labels(x_bounds)),
        )
        .y_axis(
            Axis::default()
                .title(Y_LABEL)
                .bounds(y_bounds)
                .labels(axis_labels(y_bounds)),
        );

    frame.render_widget(chart, area);
}

/// Shows the chart full-screen until a key is pressed.
pub fn show_sweep(title: &str, samples: &[Sample]) -> io::Result<()> {
    let points = scaled_points(samples);

    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let outcome = run_viewer(title, &points);
    // Restore the terminal even if drawing failed.
    let restored = disable_raw_mode().and_then(|()| stdout().execute(LeaveAlternateScreen).map(|_| ()));
    outcome.and(restored)
}

fn run_viewer(title: &str, points: &[(f64, f64)]) -> io::Result<()> {
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;
    loop {
        terminal.draw(|frame| {
            let area = frame.size();
            draw_sweep_chart(frame, area, title, points);
        })?;
        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                return Ok(());
            }
        }
    }
}

/// Writes the sweep as a PNG line chart at `path`, whatever its extension.
pub fn save_png(path: impl AsRef<Path>, samples: &[Sample]) -> Result<(), ImageError> {
    let path = path.as_ref();
    let img = render_png(&scaled_points(samples));

    let writer = BufWriter::new(File::create(path)?);
    PngEncoder::new(writer).write_image(
        img.as_raw(),
        PNG_WIDTH,
        PNG_HEIGHT,
        ExtendedColorType::Rgb8,
    )?;

    debug!(path = ?path, points = samples.len(), "Wrote sweep PNG");
    Ok(())
}

// Pixel mapping for the plot area inside the margins.
struct Canvas {
    x_bounds: [f64; 2],
    y_bounds: [f64; 2],
}

impl Canvas {
    fn left() -> i64 {
        PNG_MARGIN
    }

    fn right() -> i64 {
        i64::from(PNG_WIDTH) - 1 - PNG_MARGIN
    }

    fn top() -> i64 {
        PNG_MARGIN
    }

    fn bottom() -> i64 {
        i64::from(PNG_HEIGHT) - 1 - PNG_MARGIN
    }

    fn x(&self, v: f64) -> i64 {
        let [lo, hi] = self.x_bounds;
        let t = (v - lo) / (hi - lo);
        Self::left() + (t * (Self::right() - Self::left()) as f64).round() as i64
    }

    // Pixel rows grow downwards.
    fn y(&self, v: f64) -> i64 {
        let [lo, hi] = self.y_bounds;
        let t = (v - lo) / (hi - lo);
        Self::bottom() - (t * (Self::bottom() - Self::top()) as f64).round() as i64
    }
}

fn render_png(points: &[(f64, f64)]) -> RgbImage {
    let mut img = RgbImage::from_pixel(PNG_WIDTH, PNG_HEIGHT, BACKGROUND);
    let canvas = Canvas {
        x_bounds: bounds(points.iter().map(|p| p.0)),
        y_bounds: bounds(points.iter().map(|p| p.1)),
    };
    let (left, right, top, bottom) = (Canvas::left(), Canvas::right(), Canvas::top(), Canvas::bottom());

    for i in 1..4 {
        let x = left + (right - left) * i / 4;
        let y = top + (bottom - top) * i / 4;
        draw_line(&mut img, (x, top), (x, bottom), GRID);
        draw_line(&mut img, (left, y), (right, y), GRID);
    }

    if canvas.x_bounds[0] < 0.0 && canvas.x_bounds[1] > 0.0 {
        let x = canvas.x(0.0);
        draw_line(&mut img, (x, top), (x, bottom), ZERO_LINE);
    }
    if canvas.y_bounds[0] < 0.0 && canvas.y_bounds[1] > 0.0 {
        let y = canvas.y(0.0);
        draw_line(&mut img, (left, y), (right, y), ZERO_LINE);
    }

    draw_line(&mut img, (left, top), (right, top), FRAME);
    draw_line(&mut img, (left, bottom), (right, bottom), FRAME);
    draw_line(&mut img, (left, top), (left, bottom), FRAME);
    draw_line(&mut img, (right, top), (right, bottom), FRAME);

    let pixels: Vec<(i64, i64)> = points.iter().map(|&(x, y)| (canvas.x(x), canvas.y(y))).collect();
    match pixels.as_slice() {
        [] => {}
        [only] => {
            for dx in -2..=2 {
                draw_line(&mut img, (only.0 + dx, only.1 - 2), (only.0 + dx, only.1 + 2), TRACE);
            }
        }
        _ => {
            for pair in pixels.windows(2) {
                // Two pixels wide so the trace survives downscaling.
                draw_line(&mut img, pair[0], pair[1], TRACE);
                draw_line(&mut img, (pair[0].0, pair[0].1 + 1), (pair[1].0, pair[1].1 + 1), TRACE);
            }
        }
    }
    img
}

// Bresenham; pixels outside the image are skipped.
fn draw_line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if let (Ok(px), Ok(py)) = (u32::try_from(x), u32::try_from(y)) {
            if px < img.width() && py < img.height() {
                img.put_pixel(px, py, color);
            }
        }
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use tempfile::tempdir;

    fn rendered_text(backend: &TestBackend) -> String {
        let buffer = backend.buffer();
        buffer.content.iter().map(|cell| cell.symbol()).collect()
    }

    #[test]
    fn points_are_rescaled_to_milli_and_micro() {
        let points = scaled_points(&[Sample { voltage: 0.001, current: 2e-6 }]);
        assert!((points[0].0 - 1.0).abs() < 1e-12);
        assert!((points[0].1 - 2.0).abs() < 1e-12);
    }

    #[test]
    fn flat_series_gets_padded_bounds() {
        assert_eq!(bounds([0.0, 0.0].into_iter()), [-1.0, 1.0]);
        let b = bounds([5.0].into_iter());
        assert!(b[0] < 5.0 && b[1] > 5.0);
        assert_eq!(bounds(std::iter::empty::<f64>()), [-1.0, 1.0]);
    }

    #[test]
    fn chart_shows_title_and_axis_labels() {
        let samples = [
            Sample { voltage: -0.001, current: -1e-6 },
            Sample { voltage: 0.0, current: 0.0 },
            Sample { voltage: 0.001, current: 1e-6 },
        ];
        let points = scaled_points(&samples);
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        terminal
            .draw(|frame| {
                let area = frame.size();
                draw_sweep_chart(frame, area, "pad2 to pad7", &points);
            })
            .unwrap();

        let text = rendered_text(terminal.backend());
        assert!(text.contains("pad2 to pad7"));
        assert!(text.contains(X_LABEL));
        assert!(text.contains(Y_LABEL));
    }

    // --- PNG export ---

    fn ramp() -> Vec<Sample> {
        [-0.001, -0.0005, 0.0, 0.0005, 0.001]
            .iter()
            .map(|&v| Sample { voltage: v, current: v / 1_000.0 })
            .collect()
    }

    #[test]
    fn png_file_is_written_and_decodes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pad2 to pad7.png");
        save_png(&path, &ramp()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"\x89PNG\r\n\x1a\n"));

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (PNG_WIDTH, PNG_HEIGHT));
        assert!(img.pixels().any(|p| *p == TRACE));
    }

    #[test]
    fn rising_trace_runs_bottom_left_to_top_right() {
        let img = render_png(&scaled_points(&ramp()));
        let left = PNG_MARGIN as u32;
        let right = PNG_WIDTH - 1 - PNG_MARGIN as u32;
        let top = PNG_MARGIN as u32;
        let bottom = PNG_HEIGHT - 1 - PNG_MARGIN as u32;
        assert_eq!(*img.get_pixel(left, bottom), TRACE);
        assert_eq!(*img.get_pixel(right, top), TRACE);
        assert_eq!(*img.get_pixel(1, 1), BACKGROUND);
    }

    #[test]
    fn empty_and_single_point_sweeps_still_render() {
        let dir = tempdir().unwrap();
        save_png(dir.path().join("empty.png"), &[]).unwrap();

        let img = render_png(&scaled_points(&[Sample { voltage: 0.25, current: 1e-4 }]));
        assert!(img.pixels().any(|p| *p == TRACE));
    }

    #[test]
    fn png_into_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let err = save_png(dir.path().join("nope").join("plot.png"), &ramp()).unwrap_err();
        assert!(matches!(err, ImageError::IoError(_)));
    }
}
