//! hintgraph CLI
//!
//! - `build`: JSON sessions → `.hgr` solution graph
//! - `hint`: next-step hint for a partial program
//! - `evaluate`: hint accuracy over held-out sessions or trajectories
//! - `inspect`: graph statistics and vertices
//! - `export`: DOT / JSON for visualization tools

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use hintgraph_space::{
    build_graph, export, parse_session_records, persist, split_holdout, Experience, Harness,
    HarnessConfig, HintOutcome, HintRoute, NoHintAvailable, OutcomeCounts, PathFinder,
    ScoreWeights, Session, SessionRecord, SolutionGraph, StudentProfile, TaskId, Trajectory,
    TrajectoryAggregator, TrajectoryError, VertexId,
};
use hintgraph_syntax::{parse_tree, Canonicalizer, EditOp, NestedNode, RuleRegistry, RuleSet, SyntaxTree};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;

use config::CliConfig;

#[derive(Parser)]
#[command(name = "hintgraph")]
#[command(
    author,
    version,
    about = "hintgraph: solution graphs and next-step hints for programming tasks"
)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON configuration file (budgets, aggregation, path finder, harness).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a solution graph from JSON session files.
    Build {
        /// Session files (one record, an array, or JSON lines).
        #[arg(required = true)]
        sessions: Vec<PathBuf>,
        /// Task id the graph is built for.
        #[arg(long)]
        task: String,
        /// Rule set language (defaults to the sessions' `language`, then `python`).
        #[arg(long)]
        language: Option<String>,
        /// Output `.hgr` file.
        #[arg(short, long)]
        out: PathBuf,
        #[arg(long)]
        remove_loops: bool,
        /// Start every trajectory at the empty program.
        #[arg(long)]
        prepend_empty: bool,
        /// Hold out every N-th trajectory instead of inserting it.
        #[arg(long, requires = "holdout_out")]
        holdout_every: Option<usize>,
        /// Where held-out trajectories are written (JSON).
        #[arg(long)]
        holdout_out: Option<PathBuf>,
    },

    /// Ask for a next-step hint.
    Hint {
        #[arg(short, long)]
        graph: PathBuf,
        /// Current program in tree notation.
        #[arg(long, conflicts_with = "tree_json")]
        tree: Option<String>,
        /// Current program as a nested JSON tree.
        #[arg(long)]
        tree_json: Option<PathBuf>,
        /// Test pass rate of the current program (0..=1).
        #[arg(long)]
        rate: Option<f64>,
        /// Allow direct routes to the goal.
        #[arg(long)]
        direct: bool,
        /// Rank anchors by the weighted score (support, rollback, profile).
        #[arg(long)]
        weighted: bool,
        /// Student age, for weighted ranking.
        #[arg(long)]
        age: Option<u8>,
        /// Student experience level, for weighted ranking.
        #[arg(long)]
        experience: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Measure hint accuracy on held-out data.
    Evaluate {
        #[arg(short, long)]
        graph: PathBuf,
        /// Session files to evaluate.
        sessions: Vec<PathBuf>,
        /// Held-out trajectories written by `build --holdout-out`.
        #[arg(long)]
        trajectories: Option<PathBuf>,
        #[arg(long)]
        min_age: Option<u8>,
        #[arg(long)]
        max_age: Option<u8>,
        /// Keep only these experience levels (repeatable).
        #[arg(long)]
        experience: Vec<String>,
        /// Keep only these sources (repeatable).
        #[arg(long)]
        source: Vec<String>,
        #[arg(long)]
        age_band: Option<u8>,
        /// Rank anchors by the weighted score, using each student's profile.
        #[arg(long)]
        weighted: bool,
        #[arg(long)]
        json: bool,
    },

    /// Show graph statistics, or one vertex in detail.
    Inspect {
        #[arg(short, long)]
        graph: PathBuf,
        #[arg(long)]
        vertex: Option<u32>,
        /// Number of best-supported vertices to list.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Export the graph for visualization.
    Export {
        #[arg(short, long)]
        graph: PathBuf,
        #[arg(long, value_enum, default_value_t = ExportFormat::Dot)]
        format: ExportFormat,
        /// Output file (stdout when omitted).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Dot,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = CliConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Build {
            sessions,
            task,
            language,
            out,
            remove_loops,
            prepend_empty,
            holdout_every,
            holdout_out,
        } => {
            let mut config = config;
            config.aggregator.remove_loops |= remove_loops;
            config.aggregator.prepend_empty_state |= prepend_empty;
            let holdout = holdout_every.zip(holdout_out);
            cmd_build(&config, &sessions, &task, language.as_deref(), &out, holdout)
        }
        Commands::Hint {
            graph,
            tree,
            tree_json,
            rate,
            direct,
            weighted,
            age,
            experience,
            json,
        } => {
            let mut config = config;
            if direct && config.path_finder.direct_route.is_none() {
                config.path_finder.direct_route = Some(Default::default());
            }
            if weighted && config.path_finder.scoring.is_none() {
                config.path_finder.scoring = Some(ScoreWeights::default());
            }
            let experience = experience
                .map(|e| e.parse::<Experience>().map_err(|e| anyhow!(e)))
                .transpose()?;
            let profile = (age.is_some() || experience.is_some())
                .then(|| StudentProfile::new(age, experience, None));
            let tree = read_query_tree(tree.as_deref(), tree_json.as_deref())?;
            cmd_hint(&config, &graph, &tree, rate, profile.as_ref(), json)
        }
        Commands::Evaluate {
            graph,
            sessions,
            trajectories,
            min_age,
            max_age,
            experience,
            source,
            age_band,
            weighted,
            json,
        } => {
            let mut harness = config.harness_config();
            let filter = &mut harness.filter;
            filter.min_age = min_age.or(filter.min_age);
            filter.max_age = max_age.or(filter.max_age);
            for e in &experience {
                filter
                    .experience
                    .insert(e.parse::<Experience>().map_err(|e| anyhow!(e))?);
            }
            filter.sources.extend(source);
            if let Some(width) = age_band {
                harness.age_band_width = width;
            }
            if weighted && harness.path_finder.scoring.is_none() {
                harness.path_finder.scoring = Some(ScoreWeights::default());
            }
            cmd_evaluate(&config, harness, &graph, &sessions, trajectories.as_deref(), json)
        }
        Commands::Inspect {
            graph,
            vertex,
            limit,
        } => cmd_inspect(&graph, vertex.map(VertexId::new), limit),
        Commands::Export { graph, format, out } => cmd_export(&graph, format, out.as_deref()),
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

// ============================================================================
// Loading helpers
// ============================================================================

fn read_sessions(paths: &[PathBuf]) -> Result<Vec<SessionRecord>> {
    let mut records = Vec::new();
    for path in paths {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read sessions {}", path.display()))?;
        let parsed = parse_session_records(&text)
            .with_context(|| format!("failed to parse sessions {}", path.display()))?;
        tracing::debug!(path = %path.display(), sessions = parsed.len(), "read session file");
        records.extend(parsed);
    }
    Ok(records)
}

fn to_sessions(records: &[SessionRecord], language: &str) -> Vec<Session> {
    let mut sessions = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        if let Some(lang) = &record.language {
            if lang != language {
                tracing::warn!(record = i, language = %lang, expected = %language, "skipping session in another language");
                continue;
            }
        }
        match record.to_session() {
            Ok(s) => sessions.push(s),
            Err(err) => tracing::warn!(record = i, error = %err, "skipping unreadable session"),
        }
    }
    sessions
}

fn load_graph(path: &Path) -> Result<SolutionGraph> {
    persist::load(path).with_context(|| format!("failed to load graph {}", path.display()))
}

/// Rule set the graph was built with, resolved against the builtin registry.
fn graph_rules(graph: &SolutionGraph) -> Result<Arc<RuleSet>> {
    RuleRegistry::builtin()
        .by_id(graph.rule_set())
        .ok_or_else(|| anyhow!("graph uses unknown rule set {}", graph.rule_set()))
}

fn read_query_tree(sexpr: Option<&str>, json: Option<&Path>) -> Result<SyntaxTree> {
    match (sexpr, json) {
        (Some(text), _) => Ok(parse_tree(text)?),
        (None, Some(path)) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read tree {}", path.display()))?;
            let nested: NestedNode = serde_json::from_str(&text)
                .with_context(|| format!("failed to parse tree {}", path.display()))?;
            Ok(SyntaxTree::from_nested(&nested))
        }
        (None, None) => bail!("pass the current program with --tree or --tree-json"),
    }
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_build(
    config: &CliConfig,
    paths: &[PathBuf],
    task: &str,
    language: Option<&str>,
    out: &Path,
    holdout: Option<(usize, PathBuf)>,
) -> Result<()> {
    let records = read_sessions(paths)?;
    let language = language
        .map(str::to_string)
        .or_else(|| records.iter().find_map(|r| r.language.clone()))
        .unwrap_or_else(|| "python".to_string());
    let aggregator = TrajectoryAggregator::for_language(&RuleRegistry::builtin(), &language)?
        .with_budget(config.canon)
        .with_config(config.aggregator);
    let sessions = to_sessions(&records, &language);
    let task = TaskId::new(task);

    println!(
        "{} {} sessions for task {} ({})",
        "Building".green().bold(),
        sessions.len(),
        task.as_str().cyan(),
        aggregator.rule_set_id()
    );

    let graph = match holdout {
        None => {
            let (graph, report) = build_graph(&aggregator, task, sessions);
            if !report.is_clean() {
                eprintln!(
                    "{} {} empty, {} rejected",
                    "warning:".yellow().bold(),
                    report.skipped_empty.len(),
                    report.rejected.len()
                );
                for r in &report.rejected {
                    eprintln!("  session {}: {}", r.index, r.reason);
                }
            }
            graph
        }
        Some((every, held_path)) => {
            let mut trajectories = Vec::new();
            for (i, s) in sessions.into_iter().enumerate() {
                if s.task != task {
                    tracing::warn!(session = i, task = %s.task, "skipping session of another task");
                    continue;
                }
                match aggregator.build_trajectory(s.task, s.profile, s.snapshots) {
                    Ok(t) => trajectories.push(t),
                    Err(TrajectoryError::Empty) => {
                        tracing::warn!(session = i, "skipping session without snapshots")
                    }
                    Err(err) => tracing::warn!(session = i, error = %err, "session rejected"),
                }
            }
            let (train, test) = split_holdout(trajectories, every);
            let mut graph = SolutionGraph::new(task, aggregator.rule_set_id().clone());
            for t in &train {
                graph.insert(t)?;
            }
            fs::write(&held_path, serde_json::to_string_pretty(&test)?)
                .with_context(|| format!("failed to write {}", held_path.display()))?;
            println!(
                "  held out {} trajectories → {}",
                test.len(),
                held_path.display()
            );
            graph
        }
    };

    persist::save(&graph, out)?;
    let stats = graph.stats();
    println!("{} {}", "wrote".green().bold(), out.display().to_string().bold());
    println!("  vertices: {}", stats.vertices);
    println!("  edges: {}", stats.edges);
    println!("  terminals: {}", stats.terminals);
    println!("  transitions: {}", stats.transitions);
    if stats.approximate_vertices > 0 {
        println!(
            "  approximate states: {}",
            stats.approximate_vertices.to_string().yellow()
        );
    }
    Ok(())
}

fn cmd_hint(
    config: &CliConfig,
    graph_path: &Path,
    tree: &SyntaxTree,
    rate: Option<f64>,
    profile: Option<&StudentProfile>,
    json: bool,
) -> Result<()> {
    let graph = load_graph(graph_path)?;
    let canon = Canonicalizer::new(graph_rules(&graph)?).with_budget(config.canon);
    let finder = PathFinder::new(config.path_finder);
    let outcome = match profile {
        Some(profile) => finder.hint_for_student(&graph, &canon, tree, rate, profile)?,
        None => finder.hint_for_tree(&graph, &canon, tree, rate)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match &outcome {
        HintOutcome::Solved { vertex } => {
            println!("{} current program is a known solution ({vertex})", "solved".green().bold());
        }
        HintOutcome::NoHint(NoHintAvailable::EmptyGraph) => {
            println!("{} the graph is empty", "no hint:".yellow().bold());
        }
        HintOutcome::NoHint(NoHintAvailable::NoTerminalReachable { anchor }) => {
            println!(
                "{} no solution is reachable from the nearest state {anchor}",
                "no hint:".yellow().bold()
            );
        }
        HintOutcome::Hint(hint) => {
            let route = match hint.route {
                HintRoute::ThroughGraph => "through graph",
                HintRoute::Direct => "direct",
            };
            println!("{} ({route})", "hint".green().bold());
            println!(
                "  anchor: {} (distance {})",
                hint.anchor, hint.anchor_distance
            );
            if let Some(next) = hint.next {
                println!("  next: {next}");
            }
            println!("  goal: {}", hint.goal);
            let path: Vec<String> = hint.path.iter().map(|v| v.to_string()).collect();
            println!("  path: {}", path.join(" → "));
            if hint.degraded {
                println!("  {}", "search budget exhausted; anchor may not be nearest".yellow());
            }
            println!("  edit:");
            for op in hint.edit.ops() {
                let line = op.to_string();
                let painted = match op {
                    EditOp::Insert { .. } => line.green(),
                    EditOp::Delete { .. } => line.red(),
                    EditOp::Relabel { .. } => line.yellow(),
                };
                println!("    {painted}");
            }
            let current = canon.canonicalize_lenient(tree)?;
            if let Some(next) = hint.recommended_state(&current, &graph) {
                println!("  recommended: {}", next.to_sexpr().cyan());
            }
        }
    }
    Ok(())
}

fn cmd_evaluate(
    config: &CliConfig,
    harness_config: HarnessConfig,
    graph_path: &Path,
    session_paths: &[PathBuf],
    trajectories_path: Option<&Path>,
    json: bool,
) -> Result<()> {
    let graph = load_graph(graph_path)?;
    let mut trajectories: Vec<Trajectory> = Vec::new();

    if let Some(path) = trajectories_path {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read trajectories {}", path.display()))?;
        trajectories.extend(
            serde_json::from_str::<Vec<Trajectory>>(&text)
                .with_context(|| format!("failed to parse trajectories {}", path.display()))?,
        );
    }
    if !session_paths.is_empty() {
        let rules = graph_rules(&graph)?;
        let aggregator = TrajectoryAggregator::new(rules)
            .with_budget(config.canon)
            .with_config(config.aggregator);
        let records = read_sessions(session_paths)?;
        for (i, record) in records.iter().enumerate() {
            let session = match record.to_session() {
                Ok(s) => s,
                Err(err) => {
                    tracing::warn!(record = i, error = %err, "skipping unreadable session");
                    continue;
                }
            };
            match aggregator.build_trajectory(session.task, session.profile, session.snapshots) {
                Ok(t) => trajectories.push(t),
                Err(err) => tracing::warn!(record = i, error = %err, "skipping session"),
            }
        }
    }
    if trajectories.is_empty() {
        bail!("nothing to evaluate: pass session files or --trajectories");
    }

    let harness = Harness::new(&graph, harness_config);
    let report = harness.evaluate(graph.task(), &trajectories)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{} {} trajectories for task {}",
        "Evaluated".green().bold(),
        report.evaluated_trajectories,
        graph.task().as_str().cyan()
    );
    if report.filtered_out + report.skipped_other_task + report.skipped_rule_set > 0 {
        println!(
            "  skipped: {} filtered, {} other task, {} other rule set",
            report.filtered_out, report.skipped_other_task, report.skipped_rule_set
        );
    }
    println!(
        "  {:<32} {:>6} {:>6} {:>6} {:>6} {:>7} {:>6} {:>7} {:>7}",
        "bucket", "steps", "exact", "near", "miss", "no hint", "solved", "exact%", "useful%"
    );
    for (bucket, counts) in &report.buckets {
        print_counts(bucket, counts);
    }
    Ok(())
}

fn print_counts(bucket: &str, c: &OutcomeCounts) {
    println!(
        "  {:<32} {:>6} {:>6} {:>6} {:>6} {:>7} {:>6} {:>6.1}% {:>6.1}%",
        bucket,
        c.total(),
        c.exact,
        c.near_miss,
        c.miss,
        c.no_hint,
        c.solved,
        100.0 * c.exact_rate(),
        100.0 * c.useful_rate()
    );
}

fn cmd_inspect(graph_path: &Path, vertex: Option<VertexId>, limit: usize) -> Result<()> {
    let graph = load_graph(graph_path)?;

    if let Some(id) = vertex {
        let v = graph
            .vertex(id)
            .ok_or_else(|| anyhow!("graph has no vertex {id}"))?;
        println!("{} {}", "Vertex".green().bold(), v.id);
        println!("  state: {}", v.state.to_sexpr().cyan());
        println!("  fingerprint: {}", v.state.digest());
        println!("  support: {}", v.support());
        println!("  terminal: {}", v.terminal);
        if let Some(rate) = v.best_rate {
            println!("  best rate: {:.2}", rate);
        }
        let medians = v.profile_medians();
        if let Some(age) = medians.age {
            println!("  median age: {age:.1}");
        }
        if let Some(exp) = medians.experience {
            println!("  median experience: {exp}");
        }
        for e in graph.outgoing(id) {
            println!(
                "  {} {} (frequency {}, {} edits)",
                "→".bold(),
                e.to,
                e.frequency,
                e.edit.len()
            );
            for op in e.edit.ops() {
                println!("      {op}");
            }
        }
        return Ok(());
    }

    let stats = graph.stats();
    println!("{} {}", "Graph".green().bold(), graph_path.display());
    println!("  task: {}", graph.task().as_str().cyan());
    println!("  rule set: {}", graph.rule_set());
    println!("  vertices: {}", stats.vertices);
    println!("  edges: {}", stats.edges);
    println!("  terminals: {}", stats.terminals);
    println!("  transitions: {}", stats.transitions);
    println!("  approximate states: {}", stats.approximate_vertices);

    let mut ranked: Vec<_> = graph.vertices().iter().collect();
    ranked.sort_by(|a, b| b.support().cmp(&a.support()).then(a.id.cmp(&b.id)));
    if !ranked.is_empty() {
        println!("  best supported:");
    }
    for v in ranked.into_iter().take(limit) {
        let marker = if v.terminal { "✓".green() } else { " ".normal() };
        println!(
            "    {marker} {:>5} support {:>4}  {}",
            v.id.to_string(),
            v.support(),
            v.state.to_sexpr()
        );
    }
    Ok(())
}

fn cmd_export(graph_path: &Path, format: ExportFormat, out: Option<&Path>) -> Result<()> {
    let graph = load_graph(graph_path)?;
    let text = match format {
        ExportFormat::Dot => export::render_dot(&graph),
        ExportFormat::Json => export::render_json(&graph)?,
    };
    match out {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("{} {}", "wrote".green().bold(), path.display().to_string().bold());
        }
        None => print!("{text}"),
    }
    Ok(())
}
