use crate::UnitCapture;
use anyhow::Result;
use crossbeam_channel::tick;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Style, Stylize},
    symbols::{self, border},
    text::Line,
    widgets::{Axis, Block, Chart, Dataset, GraphType, Widget},
    DefaultTerminal, Frame,
};
use std::time::Duration;

const COLORS: [Color; 4] = [Color::Yellow, Color::Cyan, Color::Magenta, Color::Green];

/// Head and tail of one unit's sample stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub head: Vec<(f64, f64)>,
    pub tail: Vec<(f64, f64)>,
}

impl Series {
    fn points(&self, tail: bool) -> &[(f64, f64)] {
        if tail {
            &self.tail
        } else {
            &self.head
        }
    }
}

#[derive(Debug)]
pub struct PlotView {
    pub title: String,
    pub series: Vec<Series>,
    exit: bool,
}

/// First and last `plot_length` samples, x being the sample index in the
/// stream.
pub fn head_tail_points(stream: &[i16], plot_length: usize) -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
    let n = plot_length.min(stream.len());
    let to_points = |offset: usize, values: &[i16]| {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| ((offset + i) as f64, v as f64))
            .collect::<Vec<_>>()
    };
    let tail_start = stream.len() - n;
    (
        to_points(0, &stream[..n]),
        to_points(tail_start, &stream[tail_start..]),
    )
}

fn bounds<'a>(points: impl Iterator<Item = &'a (f64, f64)>) -> ([f64; 2], [f64; 2]) {
    let mut x = [f64::MAX, f64::MIN];
    let mut y = [f64::MAX, f64::MIN];
    for &(px, py) in points {
        x = [x[0].min(px), x[1].max(px)];
        y = [y[0].min(py), y[1].max(py)];
    }
    if x[0] > x[1] {
        return ([0.0, 1.0], [-1.0, 1.0]);
    }
    if y[0] == y[1] {
        y = [y[0] - 1.0, y[1] + 1.0];
    }
    (x, y)
}

impl PlotView {
    pub fn from_captures(captures: &[UnitCapture], channel: usize, plot_length: usize) -> Self {
        let series = captures
            .iter()
            .filter(|c| channel < c.records.n_channels())
            .map(|c| {
                let stream = c.records.channel_stream(channel);
                let (head, tail) = head_tail_points(&stream, plot_length);
                Series {
                    name: format!("ADQ #{}", c.unit),
                    head,
                    tail,
                }
            })
            .collect();
        Self {
            title: format!(" Channel {} ", channel + 1),
            series,
            exit: false,
        }
    }

    pub fn run(&mut self, terminal: &mut DefaultTerminal) -> Result<()> {
        let ticker = tick(Duration::from_millis(100));
        while !self.exit {
            terminal.draw(|f| self.draw(f))?;
            let _ = ticker.recv();
            self.handle_events()?;
        }
        Ok(())
    }

    fn draw(&self, frame: &mut Frame) {
        frame.render_widget(self, frame.area());
    }

    fn handle_events(&mut self) -> Result<()> {
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key_event) = event::read()? {
                if key_event.kind == KeyEventKind::Press {
                    self.handle_key_event(key_event);
                }
            }
        }
        Ok(())
    }

    fn handle_key_event(&mut self, key_event: KeyEvent) {
        if let KeyCode::Char('q') | KeyCode::Esc = key_event.code {
            self.exit = true;
        }
    }

    fn render_chart(&self, area: Rect, buf: &mut Buffer, title: &str, tail: bool) {
        let datasets = self
            .series
            .iter()
            .enumerate()
            .map(|(i, s)| {
                Dataset::default()
                    .name(s.name.clone())
                    .marker(symbols::Marker::Braille)
                    .graph_type(GraphType::Line)
                    .style(Style::default().fg(COLORS[i % COLORS.len()]))
                    .data(s.points(tail))
            })
            .collect::<Vec<_>>();
        let (x, y) = bounds(self.series.iter().flat_map(|s| s.points(tail).iter()));

        Chart::new(datasets)
            .block(
                Block::bordered()
                    .title(Line::from(title.to_string()).bold().centered())
                    .border_set(border::PLAIN),
            )
            .x_axis(
                Axis::default()
                    .title("sample")
                    .bounds(x)
                    .labels([format!("{:.0}", x[0]), format!("{:.0}", x[1])]),
            )
            .y_axis(
                Axis::default()
                    .title("code")
                    .bounds(y)
                    .labels([format!("{:.0}", y[0]), format!("{:.0}", y[1])]),
            )
            .render(area, buf);
    }
}

impl Widget for &PlotView {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let instructions = Line::from(vec![" Quit ".into(), "<Q> ".blue().bold()]);
        let block = Block::bordered()
            .title(Line::from(self.title.as_str()).bold().centered())
            .title_bottom(instructions.centered())
            .border_set(border::THICK);
        let inner = block.inner(area);
        block.render(area, buf);

        let [top, bottom] =
            Layout::vertical([Constraint::Percentage(50), Constraint::Percentage(50)]).areas(inner);
        self.render_chart(top, buf, "first samples", false);
        self.render_chart(bottom, buf, "last samples", true);
    }
}

/// Show the captures until the user quits.
pub fn show(captures: &[UnitCapture], channel: usize, plot_length: usize) -> Result<()> {
    let mut view = PlotView::from_captures(captures, channel, plot_length);
    if view.series.is_empty() {
        log::warn!("Nothing to plot on channel {}", channel + 1);
        return Ok(());
    }
    let mut terminal = ratatui::init();
    let res = view.run(&mut terminal);
    ratatui::restore();
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordSet;
    use ndarray::Array3;

    #[test]
    fn head_and_tail_keep_stream_positions() {
        let stream: Vec<i16> = (0..10).collect();
        let (head, tail) = head_tail_points(&stream, 3);
        assert_eq!(head, vec![(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]);
        assert_eq!(tail, vec![(7.0, 7.0), (8.0, 8.0), (9.0, 9.0)]);
    }

    #[test]
    fn short_streams_plot_whole() {
        let (head, tail) = head_tail_points(&[5, 6], 1000);
        assert_eq!(head.len(), 2);
        assert_eq!(head, tail);
    }

    #[test]
    fn flat_signal_gets_room() {
        let points = [(0.0, 3.0), (4.0, 3.0)];
        let (x, y) = bounds(points.iter());
        assert_eq!(x, [0.0, 4.0]);
        assert_eq!(y, [2.0, 4.0]);
    }

    #[test]
    fn one_series_per_unit_with_channel() {
        let capture = |unit, channels| UnitCapture {
            unit,
            snapshot: 0,
            records: RecordSet {
                data: Array3::zeros((channels, 1, 8)),
                timestamps: Vec::new(),
                bytes_per_sample: 2,
            },
        };
        let view = PlotView::from_captures(&[capture(1, 2), capture(2, 1)], 1, 4);
        assert_eq!(view.series.len(), 1);
        assert_eq!(view.series[0].name, "ADQ #1");
        assert_eq!(view.series[0].tail[0].0, 4.0);
    }

    #[test]
    fn renders_without_panicking() {
        let capture = UnitCapture {
            unit: 1,
            snapshot: 0,
            records: RecordSet {
                data: Array3::from_shape_fn((1, 2, 50), |(_, r, s)| (r * 50 + s) as i16),
                timestamps: Vec::new(),
                bytes_per_sample: 2,
            },
        };
        let view = PlotView::from_captures(&[capture], 0, 20);
        let area = Rect::new(0, 0, 80, 30);
        let mut buf = Buffer::empty(area);
        (&view).render(area, &mut buf);
    }
}
