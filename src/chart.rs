use std::fmt::Write;

use serde::Serialize;

const WIDTH: f64 = 640.0;
const HEIGHT: f64 = 400.0;
const MARGIN: f64 = 60.0;
const BAR_COLOR: &str = "#636efa";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub label: String,
    pub value: f64,
}

/// A vertical bar chart, one labelled and annotated bar per category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarChart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub bars: Vec<Bar>,
}

impl BarChart {
    pub fn new(title: &str, x_label: &str, y_label: &str, bars: Vec<Bar>) -> Self {
        Self {
            title: title.to_string(),
            x_label: x_label.to_string(),
            y_label: y_label.to_string(),
            bars,
        }
    }

    /// Renders a standalone SVG document.
    pub fn to_svg(&self) -> String {
        let plot_w = WIDTH - 2.0 * MARGIN;
        let plot_h = HEIGHT - 2.0 * MARGIN;
        let max = self
            .bars
            .iter()
            .map(|b| b.value)
            .fold(0.0_f64, f64::max)
            .max(f64::EPSILON);
        let slot = plot_w / self.bars.len().max(1) as f64;
        let baseline = HEIGHT - MARGIN;

        let mut svg = String::new();
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" font-family="sans-serif" font-size="12">"#
        );
        let _ = writeln!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle" font-size="16">{}</text>"#,
            WIDTH / 2.0,
            MARGIN / 2.0,
            escape(&self.title)
        );
        let _ = writeln!(
            svg,
            r#"<line x1="{MARGIN}" y1="{baseline}" x2="{}" y2="{baseline}" stroke="black"/>"#,
            WIDTH - MARGIN
        );
        let _ = writeln!(
            svg,
            r#"<line x1="{MARGIN}" y1="{MARGIN}" x2="{MARGIN}" y2="{baseline}" stroke="black"/>"#
        );

        for (i, bar) in self.bars.iter().enumerate() {
            let h = (bar.value.max(0.0) / max) * plot_h;
            let x = MARGIN + slot * i as f64 + slot * 0.15;
            let w = slot * 0.7;
            let y = baseline - h;
            let cx = x + w / 2.0;
            let _ = writeln!(
                svg,
                r#"<rect x="{x:.1}" y="{y:.1}" width="{w:.1}" height="{h:.1}" fill="{BAR_COLOR}"/>"#
            );
            let _ = writeln!(
                svg,
                r#"<text x="{cx:.1}" y="{:.1}" text-anchor="middle">{:.2}</text>"#,
                y - 4.0,
                bar.value
            );
            let _ = writeln!(
                svg,
                r#"<text x="{cx:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
                baseline + 16.0,
                escape(&bar.label)
            );
        }

        let _ = writeln!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle">{}</text>"#,
            WIDTH / 2.0,
            HEIGHT - MARGIN / 4.0,
            escape(&self.x_label)
        );
        let _ = writeln!(
            svg,
            r#"<text x="{0}" y="{1}" text-anchor="middle" transform="rotate(-90 {0} {1})">{2}</text>"#,
            MARGIN / 3.0,
            HEIGHT / 2.0,
            escape(&self.y_label)
        );
        svg.push_str("</svg>\n");
        svg
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chart() -> BarChart {
        BarChart::new(
            "Mean Intent by Cluster",
            "cluster",
            "Intent 0–10",
            vec![
                Bar {
                    label: "0".to_string(),
                    value: 6.5,
                },
                Bar {
                    label: "1".to_string(),
                    value: 3.25,
                },
            ],
        )
    }

    #[test]
    fn renders_one_bar_per_entry() {
        let svg = chart().to_svg();
        assert!(svg.starts_with("<svg "));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(svg.matches("<rect ").count(), 2);
        assert!(svg.contains(">6.50</text>"));
        assert!(svg.contains(">3.25</text>"));
        assert!(svg.contains("Mean Intent by Cluster"));
        assert!(svg.contains("Intent 0–10"));
    }

    #[test]
    fn tallest_bar_fills_plot_height() {
        let svg = chart().to_svg();
        let plot_h = HEIGHT - 2.0 * MARGIN;
        assert!(svg.contains(&format!(r#"height="{plot_h:.1}""#)));
    }

    #[test]
    fn empty_chart_is_valid() {
        let chart = BarChart::new("t", "x", "y", Vec::new());
        let svg = chart.to_svg();
        assert_eq!(svg.matches("<rect ").count(), 0);
    }

    #[test]
    fn labels_are_escaped() {
        let chart = BarChart::new("Fees & <charges>", "x", "y", Vec::new());
        assert!(chart.to_svg().contains("Fees &amp; &lt;charges&gt;"));
    }
}
