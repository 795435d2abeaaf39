/// gcnsim live visualizer: attach to any running simulation at any time.
///
/// Run in a separate terminal while `gcnsim --live` runs:
///   cargo run --bin viz
///
/// Polls /tmp/gcnsim_live.json every 200ms and renders a live TUI dashboard:
///
///     ┌ header: cycle / policy / status ───────────────────────────┐
///     │ CU heatmap (one row per CU)   │ Dispatch: occupancy, WGs … │
///     │ Memory: cache hit rates, coalescing │ Front end: DMA / ACE │
///     │ q/esc: quit  …footer…                                      │
///
/// Press q or Esc to quit. The simulation keeps running unaffected.
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use gcnsim::metrics::{LiveMetrics, METRICS_PATH, read_metrics};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph},
};
use std::{borrow::Cow, io, time::Duration};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        let metrics = read_metrics();
        terminal.draw(|f| render(f, metrics.as_ref()))?;

        // Non-blocking: poll for 200ms, then redraw regardless
        if event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn label<'a>(text: impl Into<Cow<'a, str>>) -> Span<'a> {
    Span::styled(text, Style::default().fg(Color::DarkGray))
}

fn ratio_color(fraction: f64) -> Color {
    match (fraction * 100.0) as u32 {
        0..=33 => Color::Red,
        34..=66 => Color::Yellow,
        _ => Color::Green,
    }
}

// ---------------------------------------------------------------------------
// Top-level layout
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, metrics: Option<&LiveMetrics>) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),  // header
            Constraint::Min(8),     // heatmap + dispatch
            Constraint::Length(10), // memory + front end
            Constraint::Length(1),  // footer
        ])
        .split(f.area());

    render_header(f, rows[0], metrics);

    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(rows[1]);
    render_heatmap(f, top[0], metrics);
    render_dispatch(f, top[1], metrics);

    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(rows[2]);
    render_memory(f, bottom[0], metrics);
    render_front_end(f, bottom[1], metrics);

    render_footer(f, rows[3]);
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

fn render_header(f: &mut Frame, area: Rect, metrics: Option<&LiveMetrics>) {
    let block = Block::default()
        .title(Span::styled(
            " ⚡ gcnsim live monitor ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let (cycle, policy, status) = metrics
        .map(|m| (m.cycle.to_string(), m.fetch_policy.as_str(), m.status.as_str()))
        .unwrap_or(("—".to_string(), "—", "idle"));

    let status_color = match status {
        "running" => Color::Green,
        "complete" => Color::Cyan,
        _ => Color::DarkGray,
    };

    let mut spans = vec![
        label("  cycle: "),
        Span::styled(cycle, Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        label("   fetch policy: "),
        Span::styled(policy, Style::default().fg(Color::Cyan)),
        label("   status: "),
        Span::styled(
            status.to_uppercase(),
            Style::default().fg(status_color).add_modifier(Modifier::BOLD),
        ),
    ];

    if let Some(m) = metrics.filter(|m| m.command_failures + m.wavefront_faults > 0) {
        spans.push(Span::styled(
            format!("   {} failed commands, {} faults", m.command_failures, m.wavefront_faults),
            Style::default().fg(Color::Red),
        ));
    }

    f.render_widget(Paragraph::new(Line::from(spans)), inner);
}

// ---------------------------------------------------------------------------
// CU heatmap
// ---------------------------------------------------------------------------

fn render_heatmap(f: &mut Frame, area: Rect, metrics: Option<&LiveMetrics>) {
    let block = Block::default().title(" Compute Units ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(m) = metrics else {
        f.render_widget(Paragraph::new(Line::from(label("  no compute units yet"))), inner);
        return;
    };

    // Legend line at top
    let mut lines: Vec<Line> = vec![
        Line::from(vec![
            Span::styled("██", Style::default().fg(Color::Green)),
            Span::raw(" resident wavefront   "),
            Span::styled("░░", Style::default().fg(Color::DarkGray)),
            Span::raw(" free slot   "),
            label("│ separates sequencer pools"),
        ]),
        Line::raw(""),
    ];

    for cu in &m.compute_units {
        let slots_per_pool = if cu.pool_occupancy.is_empty() {
            0
        } else {
            cu.max.wavefronts as usize / cu.pool_occupancy.len()
        };
        let mut spans: Vec<Span> = vec![label(format!("  {:<12} ", cu.location))];
        for (i, &occupied) in cu.pool_occupancy.iter().enumerate() {
            if i > 0 {
                spans.push(label("│"));
            }
            for slot in 0..slots_per_pool {
                let (symbol, color) =
                    if slot < occupied { ("█", Color::Green) } else { ("░", Color::DarkGray) };
                spans.push(Span::styled(symbol, Style::default().fg(color)));
            }
        }
        spans.push(Span::styled(
            format!("  simd {:>5.1}%", cu.simd_utilization * 100.0),
            Style::default().fg(ratio_color(cu.simd_utilization)),
        ));
        spans.push(label(format!("  {} retired", cu.wavefronts_completed)));
        lines.push(Line::from(spans));
    }

    let busy = m.compute_units.iter().filter(|cu| cu.resident_wavefronts > 0).count();
    lines.push(Line::raw(""));
    lines.push(Line::from(label(
        format!("  {}/{} CUs busy", busy, m.compute_units.len()),
    )));

    f.render_widget(Paragraph::new(lines), inner);
}

// ---------------------------------------------------------------------------
// Dispatch panel
// ---------------------------------------------------------------------------

fn render_dispatch(f: &mut Frame, area: Rect, metrics: Option<&LiveMetrics>) {
    let block = Block::default().title(" Dispatch ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2), // occupancy gauge
            Constraint::Length(1), // spacer
            Constraint::Min(0),    // text stats
        ])
        .split(inner);

    let Some(m) = metrics else {
        let msg = Paragraph::new(vec![
            Line::raw(""),
            Line::from(label("  No simulation running.")),
            Line::from(label("  Start gcnsim --live to see live data.")),
        ]);
        f.render_widget(msg, inner);
        return;
    };

    let occupancy = m.last_launch.as_ref().map(|l| l.theoretical_occupancy as f64).unwrap_or(0.0);
    let occ_gauge = Gauge::default()
        .block(Block::default().title("Theoretical occupancy"))
        .gauge_style(Style::default().fg(ratio_color(occupancy)))
        .percent((occupancy * 100.0).clamp(0.0, 100.0) as u16)
        .label(format!("{:.1}%", occupancy * 100.0));
    f.render_widget(occ_gauge, rows[0]);

    let mut text = Vec::new();
    if let Some(launch) = &m.last_launch {
        text.push(Line::from(vec![
            label("Kernel:      "),
            Span::styled(launch.kernel.clone(), Style::default().fg(Color::Yellow)),
        ]));
        text.push(Line::from(vec![
            label("Limiter:     "),
            Span::styled(launch.occupancy_limiter.clone(), Style::default().fg(Color::Yellow)),
        ]));
        text.push(Line::from(vec![
            label("Max WG/CU:   "),
            Span::raw(launch.max_workgroups_per_cu.to_string()),
        ]));
        text.push(Line::raw(""));
    }
    text.extend([
        Line::from(vec![label("Workgroups:  "), Span::raw(m.workgroups_dispatched.to_string())]),
        Line::from(vec![label("Wavefronts:  "), Span::raw(m.wavefronts_dispatched.to_string())]),
        Line::from(vec![
            label("Denials:     "),
            Span::styled(m.admission_denials.to_string(), Style::default().fg(Color::Magenta)),
        ]),
        Line::from(vec![label("Kernels done:"), Span::raw(format!(" {}", m.kernels_completed))]),
    ]);
    f.render_widget(Paragraph::new(text), rows[2]);
}

// ---------------------------------------------------------------------------
// Memory panel
// ---------------------------------------------------------------------------

fn render_memory(f: &mut Frame, area: Rect, metrics: Option<&LiveMetrics>) {
    let block = Block::default().title(" Memory ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(m) = metrics else {
        return;
    };

    let mut constraints: Vec<Constraint> = m.caches.iter().map(|_| Constraint::Length(1)).collect();
    constraints.push(Constraint::Min(0));
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(inner);

    for (cache, row) in m.caches.iter().zip(rows.iter()) {
        let gauge = Gauge::default()
            .gauge_style(Style::default().fg(ratio_color(cache.hit_rate)))
            .percent((cache.hit_rate * 100.0).clamp(0.0, 100.0) as u16)
            .label(format!(
                "{:<4} {:>5.1}% hits  ({} / {})",
                cache.name,
                cache.hit_rate * 100.0,
                cache.hits,
                cache.accesses
            ));
        f.render_widget(gauge, *row);
    }

    let text = vec![
        Line::raw(""),
        Line::from(vec![
            label("  Coalescing  "),
            Span::raw(format!(
                "{} requests → {} transactions  ",
                m.coalescing_requests, m.coalescing_transactions
            )),
            Span::styled(
                format!("({:.3}/request)", m.coalescing_ratio),
                Style::default().fg(Color::Green),
            ),
        ]),
        Line::from(vec![
            label("  DRAM        "),
            Span::raw(format!("{} reads  {} writes", m.dram_reads, m.dram_writes)),
        ]),
    ];
    if let Some(row) = rows.last() {
        f.render_widget(Paragraph::new(text), *row);
    }
}

// ---------------------------------------------------------------------------
// Front end panel: command queue, DMA engines, ACEs
// ---------------------------------------------------------------------------

fn render_front_end(f: &mut Frame, area: Rect, metrics: Option<&LiveMetrics>) {
    let block = Block::default().title(" Front End ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(m) = metrics else {
        return;
    };

    let mut lines = vec![
        Line::from(vec![label("Pending cmds: "), Span::raw(m.pending_commands.to_string())]),
        Line::from(vec![
            label("DMA:          "),
            Span::raw(format!("{} free  ", m.free_dma_engines)),
            label(format!("{} copies, {} B, {:.2} us", m.dma_transfers, m.dma_bytes, m.dma_time_us)),
        ]),
        Line::from(vec![
            label("ACEs:         "),
            Span::raw(format!("{} free  ", m.free_aces)),
            label(format!("{} WGs queued", m.queued_workgroups)),
        ]),
    ];

    let mut spans = vec![Span::raw("  ")];
    for (i, kernel) in m.ace_kernels.iter().enumerate() {
        let (text, color) = if kernel.is_empty() {
            (format!("ace{} idle ", i), Color::DarkGray)
        } else {
            (format!("ace{} {} ", i, kernel), Color::Yellow)
        };
        spans.push(Span::styled(text, Style::default().fg(color)));
    }
    lines.push(Line::from(spans));

    f.render_widget(Paragraph::new(lines), inner);
}

// ---------------------------------------------------------------------------
// Footer
// ---------------------------------------------------------------------------

fn render_footer(f: &mut Frame, area: Rect) {
    let text = Paragraph::new(Span::styled(
        format!("  q / esc: quit    auto-refreshes every 200ms    reads {}", METRICS_PATH),
        Style::default().fg(Color::DarkGray),
    ));
    f.render_widget(text, area);
}
