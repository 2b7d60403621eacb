use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dcare_core::{Department, Location, Principal, Profile, Record, Role, Scope};
use dcare_feed::{
    authorize, dashboard_landing, open_feed, page_window, resolve, FeedConfig, FeedHandle, FeedView, PageLink, PageState,
    Requirement,
};
use dcare_store::{MemoryStore, NewRecord};
use serde::Deserialize;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "dcarectl", version, about = "District Care feed CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// JSON file with reports (stored records or submissions)
    #[arg(long = "data", global = true, env = "DCARE_DATA")]
    data: Option<PathBuf>,

    /// Generate this many synthetic reports when no data file is given
    #[arg(long = "demo", global = true, default_value_t = 0)]
    demo: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum RoleArg {
    Public,
    Dept,
    Admin,
}

impl From<RoleArg> for Role {
    fn from(r: RoleArg) -> Self {
        match r {
            RoleArg::Public => Role::Public,
            RoleArg::Dept => Role::Dept,
            RoleArg::Admin => Role::Admin,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum RequireArg {
    SignedIn,
    Dept,
    Admin,
}

#[derive(clap::Args, Debug)]
struct ProfileArgs {
    /// Caller role; omit for a signed-out caller
    #[arg(long = "role", value_enum)]
    role: Option<RoleArg>,
    /// Department on the caller's profile
    #[arg(long = "profile-dept")]
    profile_dept: Option<Department>,
}

impl ProfileArgs {
    fn principal(&self) -> Option<Principal> {
        self.role.map(|_| Principal { id: "cli".into(), display_name: "dcarectl".into(), email: String::new() })
    }

    fn profile(&self) -> Option<Profile> {
        self.role.map(|r| Profile { id: "cli".into(), role: r.into(), department: self.profile_dept })
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print one page of a scope with its live counters
    Page {
        /// Department to scope to; omit for the public feed
        #[arg(long = "dept")]
        dept: Option<Department>,
        /// 1-based page number
        #[arg(long = "page", default_value_t = 1)]
        page: usize,
        /// Caller latitude for distance annotation
        #[arg(long = "lat", requires = "lng", allow_negative_numbers = true)]
        lat: Option<f64>,
        #[arg(long = "lng", requires = "lat", allow_negative_numbers = true)]
        lng: Option<f64>,
    },
    /// Follow a scope's counters until Ctrl-C
    Watch {
        #[arg(long = "dept")]
        dept: Option<Department>,
        /// Submit a synthetic report at this interval (ms) to drive updates
        #[arg(long = "tick-ms")]
        tick_ms: Option<u64>,
    },
    /// Check whether a caller may open a surface
    Authorize {
        #[arg(long = "require", value_enum, default_value_t = RequireArg::SignedIn)]
        require: RequireArg,
        /// Department a dept requirement is bound to
        #[arg(long = "require-dept")]
        require_dept: Option<Department>,
        #[command(flatten)]
        who: ProfileArgs,
    },
    /// Resolve the dashboard scope for a caller
    Scope {
        /// Department fixed by the route itself
        #[arg(long = "fixed")]
        fixed: Option<Department>,
        /// Department route parameter (unknown names are ignored)
        #[arg(long = "route")]
        route: Option<String>,
        #[command(flatten)]
        who: ProfileArgs,
    },
    /// Where `/dashboard` sends a caller
    Landing {
        #[command(flatten)]
        who: ProfileArgs,
    },
    /// Render the truncated pagination bar
    Window { current: usize, total_pages: usize },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SeedFile {
    Records(Vec<Record>),
    Submissions(Vec<NewRecord>),
}

fn init_tracing() {
    let env = std::env::var("DCARE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("DCARE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid DCARE_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_store(data: Option<&PathBuf>, demo: usize) -> Result<Arc<MemoryStore>> {
    let store = Arc::new(MemoryStore::with_queue_cap(FeedConfig::from_env().queue_cap));
    match data {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            match serde_json::from_str::<SeedFile>(&raw).with_context(|| format!("parsing {}", path.display()))? {
                SeedFile::Records(records) => store.seed(records),
                SeedFile::Submissions(subs) => {
                    for s in subs {
                        store.insert(s);
                    }
                }
            }
        }
        None => {
            for i in 0..demo {
                store.insert(synthetic(i));
            }
        }
    }
    info!(records = store.current().items.len(), "store loaded");
    Ok(store)
}

fn synthetic(i: usize) -> NewRecord {
    let dept = Department::ALL[i % Department::ALL.len()];
    NewRecord {
        title: format!("{} report #{}", dept, i + 1),
        description: "generated by dcarectl".into(),
        department_tag: Some(dept),
        lat: Some(12.97 + (i % 7) as f64 * 0.01),
        lng: Some(77.59 + (i % 5) as f64 * 0.01),
        created_by: "demo".into(),
        image_ref: None,
    }
}

fn scope_for(dept: Option<Department>) -> Scope { dept.map(Scope::Fixed).unwrap_or(Scope::All) }

async fn settled(feed: &FeedHandle) -> Result<FeedView> {
    let wait = FeedConfig::from_env().fetch_timeout + Duration::from_secs(1);
    let view = tokio::time::timeout(wait, feed.wait_for(|v| !v.is_loading() && v.state != PageState::Idle && (v.aggregate_live || v.aggregate_error.is_some())))
        .await
        .context("feed did not settle in time")??;
    Ok(view)
}

fn render_age(created_at_ms: i64) -> String {
    if created_at_ms <= 0 {
        return "-".to_string();
    }
    let mut secs = (chrono::Utc::now().timestamp_millis() - created_at_ms).max(0) as u64 / 1000;
    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3600;
    secs %= 3600;
    let mins = secs / 60;
    secs %= 60;
    if days > 0 {
        format!("{}d{}h", days, hours)
    } else if hours > 0 {
        format!("{}h{}m", hours, mins)
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", secs)
    }
}

fn render_window(links: &[PageLink], current: usize) -> String {
    links
        .iter()
        .map(|l| match l {
            PageLink::Page(p) if *p == current => format!("[{}]", p),
            PageLink::Page(p) => p.to_string(),
            PageLink::Ellipsis => "…".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_counts(view: &FeedView) {
    let a = &view.aggregate;
    let live = if view.aggregate_live { "" } else { " (not live)" };
    println!("total {}  pending {}  in_progress {}  resolved {}{}", a.total, a.pending, a.in_progress, a.resolved, live);
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Page { dept, page, lat, lng } => {
            let store = load_store(cli.data.as_ref(), cli.demo)?;
            let scope = scope_for(dept);
            info!(scope = %scope, page, "page invoked");
            let feed = open_feed(store, Some(scope), FeedConfig::from_env());
            settled(&feed).await?;
            if page != 1 {
                feed.go_to_page(page).await?;
            }
            let view = feed.current_page();
            let caller = lat.zip(lng).map(|(lat, lng)| Location { lat, lng });
            let rows = view.annotated(caller);
            match cli.output {
                Output::Human => {
                    println!("{} • page {}/{}", scope, view.page_number, view.total_pages);
                    print_counts(&view);
                    println!("{:<38} {:<12} {:<12} {:<8} {:>8}  TITLE", "ID", "DEPARTMENT", "STATUS", "AGE", "KM");
                    for r in &rows {
                        let km = r.distance_km.map(|d| format!("{:.1}", d)).unwrap_or_else(|| "-".into());
                        let rec = &r.record;
                        println!("{:<38} {:<12} {:<12} {:<8} {:>8}  {}", rec.id, rec.department_tag.as_str(), rec.status, render_age(rec.created_at), km, rec.title);
                    }
                    if view.controls_visible {
                        println!("{}", render_window(&view.page_window(), view.page_number));
                    }
                    if let Some(e) = &view.aggregate_error {
                        eprintln!("counters: {}", e);
                    }
                }
                Output::Json => {
                    #[derive(serde::Serialize)]
                    #[serde(rename_all = "camelCase")]
                    struct PageOut<'a> {
                        #[serde(flatten)]
                        view: &'a FeedView,
                        annotated: &'a [dcare_feed::AnnotatedRecord],
                    }
                    println!("{}", serde_json::to_string_pretty(&PageOut { view: &view, annotated: &rows })?);
                }
            }
            feed.close().await;
        }
        Commands::Watch { dept, tick_ms } => {
            let store = load_store(cli.data.as_ref(), cli.demo)?;
            let scope = scope_for(dept);
            info!(scope = %scope, tick_ms = ?tick_ms, "watch invoked");
            let feed = open_feed(store.clone(), Some(scope), FeedConfig::from_env());
            let mut rx = feed.subscribe();
            let mut tick = tokio::time::interval(Duration::from_millis(tick_ms.unwrap_or(1000).max(10)));
            let mut n = 0usize;
            let mut last = None;
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            warn!("feed closed; exiting watch loop");
                            break;
                        }
                        let view = rx.borrow_and_update().clone();
                        if !view.aggregate_live || last == Some(view.aggregate) {
                            continue;
                        }
                        last = Some(view.aggregate);
                        match cli.output {
                            Output::Human => print_counts(&view),
                            Output::Json => println!("{}", serde_json::to_string(&view.aggregate)?),
                        }
                    }
                    _ = tick.tick(), if tick_ms.is_some() => {
                        let mut sub = synthetic(n);
                        if let Some(d) = dept {
                            sub.department_tag = Some(d);
                        }
                        store.insert(sub);
                        n += 1;
                    }
                    _ = signal::ctrl_c() => {
                        info!("Ctrl-C received; shutting down watch loop");
                        break;
                    }
                }
            }
            feed.close().await;
        }
        Commands::Authorize { require, require_dept, who } => {
            let req = match require {
                RequireArg::SignedIn => Requirement::SignedIn,
                RequireArg::Dept => Requirement::Dept { department: require_dept },
                RequireArg::Admin => Requirement::Admin,
            };
            let principal = who.principal();
            let profile = who.profile();
            let decision = authorize(principal.as_ref(), profile.as_ref(), &req);
            match cli.output {
                Output::Human => match &decision {
                    Ok(()) => println!("allow"),
                    Err(reason) => println!("deny ({:?}) -> {:?}", reason, reason.redirect()),
                },
                Output::Json => {
                    let out = match &decision {
                        Ok(()) => serde_json::json!({ "allow": true }),
                        Err(reason) => serde_json::json!({ "allow": false, "reason": reason, "redirect": reason.redirect() }),
                    };
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
            }
        }
        Commands::Scope { fixed, route, who } => {
            let route = dcare_feed::parse_route_dept(route.as_deref());
            let profile = who.profile();
            let scope = resolve(profile.as_ref(), route, fixed);
            match (cli.output, scope) {
                (Output::Human, Ok(s)) => println!("{}", s),
                (Output::Human, Err(e)) => println!("warning: {}", e),
                (Output::Json, s) => println!("{}", serde_json::to_string_pretty(&s)?),
            }
        }
        Commands::Landing { who } => {
            let profile = who.profile();
            let landing = dashboard_landing(profile.as_ref());
            match cli.output {
                Output::Human => println!("{:?}", landing),
                Output::Json => println!("{}", serde_json::to_string(&landing)?),
            }
        }
        Commands::Window { current, total_pages } => {
            if current == 0 || current > total_pages {
                bail!("current page must be within 1..={}", total_pages);
            }
            let links = page_window(current, total_pages);
            match cli.output {
                Output::Human => println!("{}", render_window(&links, current)),
                Output::Json => println!("{}", serde_json::to_string(links.as_slice())?),
            }
        }
    }

    Ok(())
}
