//! Cluster (nodes with role, health and load)
//! Jobs (status, progress, cracked hashes)
//! Failover (audit log, newest first)

use std::{
  env,
  error::Error,
  io,
  sync::mpsc,
  thread,
  time::{Duration, Instant},
};

use crossterm::{
  event::{self, DisableMouseCapture, EnableMouseCapture, Event as CEvent, KeyCode},
  execute,
  terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use tokio::runtime::Runtime;
use tui::{
  Terminal,
  backend::{Backend, CrosstermBackend},
  layout::{Constraint, Direction, Layout, Rect},
  style::{Color, Modifier, Style},
  text::{Span, Spans},
  widgets::{Block, Borders, List, ListItem, Paragraph, Tabs},
};

use crackfleet::cluster::ClusterMetrics;
use crackfleet::models::{ClusterNode, ClusterState, FailoverEvent, HealthStatus, JobStatus, JobSummary, NodeRole};

static POLL_INTERVAL: Duration = Duration::from_secs(2);
static DEFAULT_URL: &str = "http://127.0.0.1:8080";

#[derive(Clone, Copy)]
enum DashboardTab {
  Cluster,
  Jobs,
  Failover,
}

#[derive(Default)]
struct Snapshot {
  cluster: Option<ClusterState>,
  metrics: Option<ClusterMetrics>,
  jobs: Vec<JobSummary>,
  failover: Vec<FailoverEvent>,
  error: Option<String>,
}

struct App {
  current_tab: DashboardTab,
  url: String,
  snapshot: Snapshot,
}

impl App {
  fn new(url: String) -> Self {
    Self {
      current_tab: DashboardTab::Cluster,
      url,
      snapshot: Snapshot::default(),
    }
  }

  fn next_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Cluster => DashboardTab::Jobs,
      DashboardTab::Jobs => DashboardTab::Failover,
      DashboardTab::Failover => DashboardTab::Cluster,
    }
  }

  fn previous_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Cluster => DashboardTab::Failover,
      DashboardTab::Jobs => DashboardTab::Cluster,
      DashboardTab::Failover => DashboardTab::Jobs,
    }
  }
}

async fn fetch_snapshot(client: &reqwest::Client, url: &str) -> Result<Snapshot, reqwest::Error> {
  let cluster = client
    .get(format!("{}/cluster/info", url))
    .send()
    .await?
    .error_for_status()?
    .json::<ClusterState>()
    .await?;
  let metrics = client
    .get(format!("{}/cluster/metrics", url))
    .send()
    .await?
    .error_for_status()?
    .json::<ClusterMetrics>()
    .await?;
  let jobs = client
    .get(format!("{}/jobs", url))
    .send()
    .await?
    .error_for_status()?
    .json::<Vec<JobSummary>>()
    .await?;
  let failover = client
    .get(format!("{}/cluster/failover?limit=20", url))
    .send()
    .await?
    .error_for_status()?
    .json::<Vec<FailoverEvent>>()
    .await?;

  Ok(Snapshot {
    cluster: Some(cluster),
    metrics: Some(metrics),
    jobs,
    failover,
    error: None,
  })
}

fn main() -> Result<(), Box<dyn Error>> {
  let url = env::var("CRACKFLEET_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
  let url = url.trim_end_matches('/').to_string();

  let (tx, rx) = mpsc::channel::<Snapshot>();
  {
    let url = url.clone();
    let rt_bg = Runtime::new()?;
    thread::spawn(move || {
      let client = reqwest::Client::builder()
        .timeout(POLL_INTERVAL)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());
      loop {
        let snapshot = rt_bg
          .block_on(fetch_snapshot(&client, &url))
          .unwrap_or_else(|e| Snapshot {
            error: Some(e.to_string()),
            ..Snapshot::default()
          });
        if tx.send(snapshot).is_err() {
          break;
        }
        thread::sleep(POLL_INTERVAL);
      }
    });
  }

  enable_raw_mode()?;
  let mut stdout = io::stdout();
  execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
  let backend = CrosstermBackend::new(stdout);
  let mut terminal = Terminal::new(backend)?;

  let mut app = App::new(url);
  let tick_rate = Duration::from_millis(500);
  let mut last_tick = Instant::now();

  loop {
    if let Ok(snapshot) = rx.try_recv() {
      app.snapshot = snapshot;
    }
    terminal.draw(|f| ui(f, &app))?;

    let timeout = tick_rate
      .checked_sub(last_tick.elapsed())
      .unwrap_or_else(|| Duration::from_secs(0));
    if event::poll(timeout)? {
      if let CEvent::Key(key) = event::read()? {
        match key.code {
          KeyCode::Char('q') => break,
          KeyCode::Right => app.next_tab(),
          KeyCode::Left => app.previous_tab(),
          _ => {}
        }
      }
    }
    if last_tick.elapsed() >= tick_rate {
      last_tick = Instant::now();
    }
  }

  disable_raw_mode()?;
  execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
  terminal.show_cursor()?;
  Ok(())
}

fn ui<B: Backend>(f: &mut tui::Frame<B>, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .margin(1)
    .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)].as_ref())
    .split(f.size());

  let tab_titles = vec!["Cluster", "Jobs", "Failover"];
  let tabs = Tabs::new(
    tab_titles
      .iter()
      .map(|t| Spans::from(Span::styled(*t, Style::default().fg(Color::Yellow))))
      .collect(),
  )
  .block(Block::default().borders(Borders::ALL).title(format!("crackfleet @ {}", app.url)))
  .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
  .select(match app.current_tab {
    DashboardTab::Cluster => 0,
    DashboardTab::Jobs => 1,
    DashboardTab::Failover => 2,
  });
  f.render_widget(tabs, chunks[0]);

  match app.current_tab {
    DashboardTab::Cluster => render_cluster(f, app, chunks[1]),
    DashboardTab::Jobs => render_jobs(f, app, chunks[1]),
    DashboardTab::Failover => render_failover(f, app, chunks[1]),
  }

  let footer_text = match &app.snapshot.error {
    Some(e) => format!("Unreachable: {} | q: Quit", e),
    None => "←/→: Switch Tabs | q: Quit".to_string(),
  };
  let footer = Paragraph::new(footer_text)
    .style(Style::default().fg(Color::White))
    .block(Block::default().borders(Borders::ALL));
  f.render_widget(footer, chunks[2]);
}

fn health_color(node: &ClusterNode) -> Color {
  match node.health_status {
    HealthStatus::Healthy => Color::Green,
    HealthStatus::Degraded => Color::Yellow,
    HealthStatus::Failed => Color::Red,
  }
}

fn render_cluster<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let chunks = Layout::default()
    .direction(Direction::Horizontal)
    .constraints([Constraint::Percentage(65), Constraint::Percentage(35)].as_ref())
    .split(area);

  let mut nodes: Vec<&ClusterNode> = app
    .snapshot
    .cluster
    .as_ref()
    .map(|c| c.nodes.values().collect())
    .unwrap_or_default();
  nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));

  let node_items: Vec<ListItem> = nodes
    .iter()
    .map(|n| {
      let role_style = if n.role == NodeRole::Leader {
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
      } else {
        Style::default().add_modifier(Modifier::BOLD)
      };
      let lines = vec![
        Spans::from(vec![
          Span::styled(format!("{} ", n.node_id), role_style),
          Span::raw(format!("{} ({})", n.endpoint(), n.role)),
        ]),
        Spans::from(Span::styled(
          format!("Health: {}", n.health_status),
          Style::default().fg(health_color(n)),
        )),
        Spans::from(Span::raw(format!(
          "CPU {:.1}% | Mem {:.1}% | Load {:.2}",
          n.load_metrics.cpu_usage, n.load_metrics.memory_usage, n.load_metrics.load_average
        ))),
      ];
      ListItem::new(lines)
    })
    .collect();
  let nodes_list = List::new(node_items).block(Block::default().borders(Borders::ALL).title("Nodes"));
  f.render_widget(nodes_list, chunks[0]);

  let summary = match (&app.snapshot.cluster, &app.snapshot.metrics) {
    (Some(cluster), Some(metrics)) => vec![
      ListItem::new(Span::raw(format!("Term: {}", cluster.term))),
      ListItem::new(Span::raw(format!(
        "Leader: {}",
        cluster.leader_node_id.as_deref().unwrap_or("none")
      ))),
      ListItem::new(Span::raw(format!(
        "Healthy: {}/{}",
        metrics.healthy_nodes, metrics.total_nodes
      ))),
      ListItem::new(Span::raw(format!("Avg CPU: {:.1}%", metrics.avg_cpu_usage))),
      ListItem::new(Span::raw(format!("Avg Mem: {:.1}%", metrics.avg_memory_usage))),
    ],
    _ => vec![ListItem::new(Span::raw("No cluster data"))],
  };
  let summary_list = List::new(summary).block(Block::default().borders(Borders::ALL).title("Cluster"));
  f.render_widget(summary_list, chunks[1]);
}

fn render_jobs<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let job_items: Vec<ListItem> = app
    .snapshot
    .jobs
    .iter()
    .map(|j| {
      let status_color = match j.status {
        JobStatus::Completed => Color::Green,
        JobStatus::Failed => Color::Red,
        JobStatus::Cancelled => Color::Gray,
        JobStatus::Running => Color::Cyan,
        JobStatus::Pending => Color::Yellow,
      };
      ListItem::new(Spans::from(vec![
        Span::styled(format!("{} ", j.id), Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        Span::raw(format!("{} | {} {} | ", j.name, j.attack_mode, j.hash_type)),
        Span::styled(j.status.to_string(), Style::default().fg(status_color)),
        Span::raw(format!(
          " | {:.1}% | cracked {}/{} | partitions {} ({} running)",
          j.progress, j.cracked_hashes, j.total_hashes, j.partitions, j.running_partitions
        )),
      ]))
    })
    .collect();
  let header = format!("Jobs ({})", app.snapshot.jobs.len());
  let jobs_list = List::new(job_items).block(Block::default().borders(Borders::ALL).title(header));
  f.render_widget(jobs_list, area);
}

fn render_failover<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let items: Vec<ListItem> = app
    .snapshot
    .failover
    .iter()
    .map(|e| {
      ListItem::new(Spans::from(vec![
        Span::styled(
          e.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
          Style::default().fg(Color::Green),
        ),
        Span::raw(" - "),
        Span::styled(e.event_type.as_str(), Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(format!(" - {}", e.reason)),
      ]))
    })
    .collect();
  let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Failover Log"));
  f.render_widget(list, area);
}
