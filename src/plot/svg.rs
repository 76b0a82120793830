//! Minimal SVG building blocks: a canvas that accumulates elements as
//! text, linear scales and axis drawing.

/// Colours and font used by every plot.
#[derive(Debug, Clone, PartialEq)]
pub struct SvgTheme {
    pub background: String,
    pub axis: String,
    pub grid: String,
    pub text: String,
    pub text_secondary: String,
    pub line: String,
    pub band: String,
    pub threshold: String,
    pub font_family: String,
    /// One colour per chain in trace plots, cycled.
    pub palette: Vec<String>,
}

impl Default for SvgTheme {
    fn default() -> Self {
        SvgTheme::light()
    }
}

impl SvgTheme {
    pub fn light() -> Self {
        SvgTheme {
            background: "#ffffff".to_string(),
            axis: "#333333".to_string(),
            grid: "#e5e5e5".to_string(),
            text: "#1a1a1a".to_string(),
            text_secondary: "#666666".to_string(),
            line: "#1f4e79".to_string(),
            band: "#9dc3e6".to_string(),
            threshold: "#c00000".to_string(),
            font_family: "Helvetica, Arial, sans-serif".to_string(),
            palette: ["#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }

    pub fn chain_color(&self, index: usize) -> &str {
        &self.palette[index % self.palette.len()]
    }
}

/// Escapes text for use in element content and attribute values.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Maps a data interval linearly onto a pixel interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub domain: (f64, f64),
    pub range: (f64, f64),
}

impl Scale {
    /// A degenerate domain is widened so every value maps to the middle.
    pub fn new(domain: (f64, f64), range: (f64, f64)) -> Self {
        let (lo, hi) = domain;
        let domain = if (hi - lo).abs() < 1e-12 {
            (lo - 0.5, hi + 0.5)
        } else {
            (lo, hi)
        };
        Scale { domain, range }
    }

    pub fn map(&self, value: f64) -> f64 {
        let (d0, d1) = self.domain;
        let (r0, r1) = self.range;
        r0 + (value - d0) / (d1 - d0) * (r1 - r0)
    }
}

/// Evenly spaced "nice" tick values (steps of 1, 2 or 5 times a power of
/// ten) covering `[min, max]`.
pub fn ticks(min: f64, max: f64, target: usize) -> Vec<f64> {
    if !(min.is_finite() && max.is_finite()) || target == 0 {
        return Vec::new();
    }
    if (max - min).abs() < 1e-12 {
        return vec![min];
    }
    let raw = (max - min) / target as f64;
    let magnitude = 10f64.powi(raw.log10().floor() as i32);
    let step = [1.0, 2.0, 5.0, 10.0]
        .iter()
        .map(|m| m * magnitude)
        .find(|s| *s >= raw)
        .unwrap_or(10.0 * magnitude);
    let first = (min / step).ceil() as i64;
    let last = (max / step).floor() as i64;
    (first..=last).map(|i| i as f64 * step).collect()
}

/// Decimal places needed to tell ticks apart.
pub fn tick_precision(ticks: &[f64]) -> usize {
    if ticks.len() < 2 {
        return 1;
    }
    let step = (ticks[1] - ticks[0]).abs();
    if step >= 1.0 {
        0
    } else {
        (-step.log10()).ceil() as usize
    }
}

/// Plotting area inside a canvas with its two scales.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub x: Scale,
    pub y: Scale,
}

impl Frame {
    pub fn new(
        left: f64,
        top: f64,
        width: f64,
        height: f64,
        x: (f64, f64),
        y: (f64, f64),
    ) -> Self {
        Frame {
            left,
            top,
            width,
            height,
            x: Scale::new(x, (left, left + width)),
            y: Scale::new(y, (top + height, top)),
        }
    }

    pub fn point(&self, x: f64, y: f64) -> (f64, f64) {
        (self.x.map(x), self.y.map(y))
    }
}

/// SVG document under construction.
#[derive(Debug, Clone)]
pub struct Canvas {
    svg: String,
}

impl Canvas {
    pub fn new(width: f64, height: f64, theme: &SvgTheme) -> Self {
        let mut svg = String::new();
        svg.push_str(&format!(
            r#"<svg viewBox="0 0 {width} {height}" width="{width}" height="{height}" xmlns="http://www.w3.org/2000/svg">"#
        ));
        svg.push_str(&format!(
            r#"<rect x="0" y="0" width="{width}" height="{height}" fill="{}"/>"#,
            theme.background
        ));
        Canvas { svg }
    }

    pub fn line(&mut self, from: (f64, f64), to: (f64, f64), stroke: &str, width: f64) {
        self.svg.push_str(&format!(
            r#"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="{stroke}" stroke-width="{width}"/>"#,
            from.0, from.1, to.0, to.1
        ));
    }

    pub fn dashed_line(&mut self, from: (f64, f64), to: (f64, f64), stroke: &str) {
        self.svg.push_str(&format!(
            r#"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="{stroke}" stroke-width="1.5" stroke-dasharray="6,4"/>"#,
            from.0, from.1, to.0, to.1
        ));
    }

    pub fn polyline(&mut self, points: &[(f64, f64)], stroke: &str, width: f64) {
        if points.is_empty() {
            return;
        }
        self.svg.push_str(&format!(
            r#"<polyline points="{}" fill="none" stroke="{stroke}" stroke-width="{width}" stroke-linejoin="round"/>"#,
            path_points(points)
        ));
    }

    pub fn polygon(&mut self, points: &[(f64, f64)], fill: &str, opacity: f64) {
        if points.is_empty() {
            return;
        }
        self.svg.push_str(&format!(
            r#"<polygon points="{}" fill="{fill}" fill-opacity="{opacity}" stroke="none"/>"#,
            path_points(points)
        ));
    }

    pub fn circle(&mut self, center: (f64, f64), r: f64, fill: &str) {
        self.svg.push_str(&format!(
            r#"<circle cx="{:.1}" cy="{:.1}" r="{r}" fill="{fill}"/>"#,
            center.0, center.1
        ));
    }

    pub fn text(
        &mut self,
        at: (f64, f64),
        content: &str,
        size: f64,
        anchor: &str,
        fill: &str,
        theme: &SvgTheme,
    ) {
        self.svg.push_str(&format!(
            r#"<text x="{:.1}" y="{:.1}" font-size="{size}" text-anchor="{anchor}" fill="{fill}" font-family="{}">{}</text>"#,
            at.0,
            at.1,
            theme.font_family,
            escape_xml(content)
        ));
    }

    pub fn rotated_text(&mut self, at: (f64, f64), content: &str, size: f64, theme: &SvgTheme) {
        self.svg.push_str(&format!(
            r#"<text x="{x:.1}" y="{y:.1}" font-size="{size}" text-anchor="middle" fill="{}" font-family="{}" transform="rotate(-90 {x:.1} {y:.1})">{}</text>"#,
            theme.text,
            theme.font_family,
            escape_xml(content),
            x = at.0,
            y = at.1
        ));
    }

    /// Grid lines, tick labels and optional axis titles around `frame`.
    pub fn axes(
        &mut self,
        frame: &Frame,
        x_ticks: &[f64],
        y_ticks: &[f64],
        labels: (&str, &str),
        font_size: f64,
        theme: &SvgTheme,
    ) {
        let bottom = frame.top + frame.height;
        let right = frame.left + frame.width;
        let x_precision = tick_precision(x_ticks);
        let y_precision = tick_precision(y_ticks);

        for &t in y_ticks {
            let y = frame.y.map(t);
            self.line((frame.left, y), (right, y), &theme.grid, 1.0);
            self.text(
                (frame.left - 6.0, y + font_size / 3.0),
                &format!("{:.*}", y_precision, t),
                font_size,
                "end",
                &theme.text_secondary,
                theme,
            );
        }
        for &t in x_ticks {
            let x = frame.x.map(t);
            self.line((x, bottom), (x, bottom + 4.0), &theme.axis, 1.0);
            self.text(
                (x, bottom + 6.0 + font_size),
                &format!("{:.*}", x_precision, t),
                font_size,
                "middle",
                &theme.text_secondary,
                theme,
            );
        }
        self.line((frame.left, bottom), (right, bottom), &theme.axis, 1.0);
        self.line((frame.left, frame.top), (frame.left, bottom), &theme.axis, 1.0);

        let (x_label, y_label) = labels;
        if !x_label.is_empty() {
            self.text(
                (frame.left + frame.width / 2.0, bottom + 2.4 * font_size + 10.0),
                x_label,
                font_size + 1.0,
                "middle",
                &theme.text,
                theme,
            );
        }
        if !y_label.is_empty() {
            let at = (frame.left - 42.0, frame.top + frame.height / 2.0);
            self.rotated_text(at, y_label, font_size + 1.0, theme);
        }
    }

    pub fn open_group(&mut self) {
        self.svg.push_str("<g>");
    }

    pub fn close_group(&mut self) {
        self.svg.push_str("</g>");
    }

    pub fn finish(mut self) -> String {
        self.svg.push_str("</svg>");
        self.svg
    }
}

fn path_points(points: &[(f64, f64)]) -> String {
    points
        .iter()
        .map(|(x, y)| format!("{:.1},{:.1}", x, y))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_maps_endpoints_and_inverts_y() {
        let frame = Frame::new(50.0, 10.0, 200.0, 100.0, (0.0, 10.0), (-1.0, 1.0));
        assert_eq!(frame.point(0.0, -1.0), (50.0, 110.0));
        assert_eq!(frame.point(10.0, 1.0), (250.0, 10.0));
        assert_eq!(frame.point(5.0, 0.0), (150.0, 60.0));
    }

    #[test]
    fn degenerate_domain_maps_to_middle() {
        let scale = Scale::new((3.0, 3.0), (0.0, 100.0));
        assert_abs_diff_eq!(scale.map(3.0), 50.0);
    }

    #[test]
    fn ticks_are_nice_and_inside_range() {
        assert_eq!(ticks(0.0, 10.0, 5), vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
        assert_eq!(ticks(1995.0, 2004.0, 5), vec![1996.0, 1998.0, 2000.0, 2002.0, 2004.0]);
        assert_eq!(ticks(-1.3, 2.2, 6), vec![-1.0, 0.0, 1.0, 2.0]);
        let t = ticks(0.0, 1.0, 4);
        assert_eq!(t, vec![0.0, 0.5, 1.0]);
        assert_eq!(tick_precision(&t), 1);
        assert_eq!(ticks(1.0, 1.0, 4), vec![1.0]);
        assert!(ticks(f64::NAN, 1.0, 4).is_empty());
        assert_eq!(tick_precision(&[1996.0, 1998.0]), 0);
    }

    #[test]
    fn escapes_markup_in_text() {
        assert_eq!(
            escape_xml("Côte d'Ivoire <north> & co"),
            "Côte d&apos;Ivoire &lt;north&gt; &amp; co"
        );
        let theme = SvgTheme::light();
        let mut canvas = Canvas::new(100.0, 50.0, &theme);
        canvas.text((1.0, 2.0), "a<b", 10.0, "start", &theme.text, &theme);
        let svg = canvas.finish();
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains(">a&lt;b</text>"));
    }
}
