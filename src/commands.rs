use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::config::Config;
use crate::notify::ConsoleNotifier;
use crate::parse::{join_remote_path, parse_remote_and_path, validate_job_name};
use crate::remote::{Remote, RemoteList};
use crate::transfer::{
    DownloadQueue, LogicalRequest, Operation, ProcessExecutor, ProgressSample, QueueEvent,
    TransferFlags, TransferRunner,
};
use crate::util::{PathSanitizer, failure_log_path, init_job_progress, new_job_bar, print_summary};

pub struct FetchArgs {
    pub names: Vec<String>,
    pub dest: Option<PathBuf>,
    pub source_root: Option<String>,
    pub json: bool,
    pub no_input: bool,
    pub verbose: bool,
}

pub struct SetArgs {
    pub tool_path: Option<PathBuf>,
    pub download_dir: Option<PathBuf>,
    pub source_root: Option<String>,
    pub remote_filter: Option<String>,
    pub bandwidth_limit: Option<String>,
    pub max_job_retries: Option<u32>,
    pub backoff_base_secs: Option<u64>,
}

fn discover(config: &Config) -> Result<(PathBuf, RemoteList)> {
    let tool = config.resolve_tool()?;
    let remotes = TransferRunner::discover_remotes(
        &ProcessExecutor::new(),
        &tool,
        config.remote_filter.as_deref(),
        config.list_timeout(),
    )
    .with_context(|| format!("failed to list remotes with {}", tool.display()))?;
    Ok((tool, remotes))
}

/// Runner over the mirrors the tool reports right now.
pub fn build_runner(config: &Config) -> Result<TransferRunner> {
    let (tool, remotes) = discover(config)?;
    if remotes.is_empty() {
        return Err(anyhow::anyhow!(
            "the transfer tool reports no usable mirrors (filter: {:?})",
            config.remote_filter
        ));
    }
    let sanitizer = PathSanitizer::for_home().with_root(&config.download_dir, "<downloads>");
    Ok(TransferRunner::new(
        Arc::new(ProcessExecutor::new()),
        tool,
        remotes,
        Arc::new(ConsoleNotifier::new(cfg!(windows))),
    )
    .with_sanitizer(sanitizer)
    .with_short_timeout(config.list_timeout()))
}

pub fn handle_remotes(config: &Config) -> Result<()> {
    let (_, remotes) = discover(config)?;
    if remotes.is_empty() {
        println!("No mirrors found.");
    } else {
        remotes.show_table();
    }
    Ok(())
}

pub fn handle_run(config: &Config, operation: String, path: String, dest: Option<PathBuf>) -> Result<()> {
    let runner = build_runner(config)?;
    // `mirror:path` pins the remote; a bare path goes to the first mirror under the source root.
    let (remote, source) = match parse_remote_and_path(&path) {
        Ok((r, p)) => (Some(Remote::new(r)), p),
        Err(_) => (runner.remotes().first().cloned(), join_remote_path(&config.source_root, &path)),
    };
    let mut request = LogicalRequest::new(Operation::parse(&operation))
        .with_source(source)
        .with_flags(TransferFlags { stats_interval: None, ..config.transfer_flags() });
    if let Some(d) = dest {
        request = request.with_destination(d);
    }
    if let Some(r) = &remote {
        request = request.rebind(r);
    }
    tracing::debug!("[run] {} {:?}", runner.program().display(), request.to_args());
    let result = runner.run(&request);
    print!("{}", result.stdout);
    if !result.success() {
        eprint!("{}", runner.sanitizer().sanitize(&result.stderr));
        return Err(crate::transfer::runner::failure_from(&result).into());
    }
    Ok(())
}

pub fn handle_set(config: &Config, config_dir: &Path, args: SetArgs) -> Result<()> {
    let mut cfg = config.clone();
    let SetArgs {
        tool_path,
        download_dir,
        source_root,
        remote_filter,
        bandwidth_limit,
        max_job_retries,
        backoff_base_secs,
    } = args;
    if let Some(p) = tool_path {
        cfg.tool_path = Some(p);
    }
    if let Some(d) = download_dir {
        cfg.download_dir = d;
    }
    if let Some(r) = source_root {
        cfg.source_root = r;
    }
    if let Some(f) = remote_filter {
        cfg.remote_filter = Some(f).filter(|s| !s.is_empty());
    }
    if let Some(b) = bandwidth_limit {
        cfg.bandwidth_limit = Some(b).filter(|s| !s.is_empty());
    }
    if let Some(n) = max_job_retries {
        cfg.max_job_retries = n;
    }
    if let Some(s) = backoff_base_secs {
        cfg.backoff_base_secs = s;
    }
    cfg.save(config_dir)?;
    println!("✅ configuration saved to {}", config_dir.join("config.json").display());
    Ok(())
}

/// Builds a request for a job name.
struct JobTemplate {
    source_root: String,
    dest_dir: PathBuf,
    flags: TransferFlags,
}

impl JobTemplate {
    fn request_for(&self, name: &str) -> Result<(String, LogicalRequest)> {
        let name = validate_job_name(name)?;
        let req = LogicalRequest::copy(join_remote_path(&self.source_root, &name), self.dest_dir.join(&name))
            .with_flags(self.flags.clone());
        Ok((name, req))
    }
}

/// Queue every name and run the queue to completion, reading queue edits
/// from stdin on the way.
pub fn handle_fetch(config: &Config, config_dir: &Path, args: FetchArgs) -> Result<()> {
    let FetchArgs { names, dest, source_root, json, no_input, verbose } = args;
    let dest_dir = dest.unwrap_or_else(|| config.download_dir.clone());
    std::fs::create_dir_all(&dest_dir)
        .with_context(|| format!("cannot create download directory {}", dest_dir.display()))?;
    let template = JobTemplate {
        source_root: source_root.unwrap_or_else(|| config.source_root.clone()),
        dest_dir,
        flags: config.transfer_flags(),
    };

    let runner = Arc::new(build_runner(config)?);
    let queue =
        DownloadQueue::start(runner, config.queue_options(Some(failure_log_path(config_dir))));
    for name in &names {
        match template.request_for(name) {
            Ok((n, req)) => {
                if !queue.enqueue(n.clone(), req) {
                    eprintln!("⚠️ '{}' is already queued", n);
                }
            }
            Err(e) => eprintln!("⚠️ skipping '{}': {}", name, e),
        }
    }
    if queue.is_empty() {
        return Ok(());
    }

    let events = queue.events();
    let progress = queue.progress();
    let mut commands = if no_input {
        crossbeam_channel::never()
    } else {
        spawn_stdin_reader()
    };
    let mut view = FetchView::new(json, verbose);
    let start = Instant::now();
    let mut input_closed = false;
    let mut drained = false;
    while !drained {
        crossbeam_channel::select! {
            recv(events) -> ev => match ev {
                Ok(QueueEvent::Idle) if queue.is_empty() => drained = true,
                Ok(ev) => view.on_event(ev),
                Err(_) => drained = true,
            },
            recv(progress) -> p => {
                if let Ok(p) = p {
                    view.on_progress(&p.name, &p.sample);
                }
            },
            recv(commands) -> line => match line {
                Ok(line) => apply_queue_command(&queue, &template, &view, line.trim()),
                Err(_) => input_closed = true,
            },
        }
        if input_closed {
            commands = crossbeam_channel::never();
            input_closed = false;
        }
    }
    view.finish(start.elapsed().as_secs_f64());
    Ok(())
}

fn spawn_stdin_reader() -> crossbeam_channel::Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn apply_queue_command(queue: &DownloadQueue, template: &JobTemplate, view: &FetchView, line: &str) {
    let (cmd, arg) = match line.split_once(char::is_whitespace) {
        Some((c, a)) => (c, a.trim()),
        None => (line, ""),
    };
    match cmd {
        "" => {}
        // 跳过：当前任务不再重试，直接下一个
        "skip" | "s" => match queue.skip_current() {
            Some(n) => view.say(&format!("⏭  skipping {}", n)),
            None => view.say("nothing to skip"),
        },
        "cancel" | "c" => match queue.cancel_current() {
            Some(n) => view.say(&format!("✖ cancelling {}", n)),
            None => view.say("nothing to cancel"),
        },
        "rm" => {
            if queue.remove(arg) {
                view.say(&format!("removed {}", arg));
            } else {
                view.say(&format!("'{}' is not a queued (non-running) job", arg));
            }
        }
        "add" => match template.request_for(arg) {
            Ok((n, req)) => {
                if queue.enqueue(n.clone(), req) {
                    view.say(&format!("queued {}", n));
                } else {
                    view.say(&format!("'{}' is already queued", n));
                }
            }
            Err(e) => view.say(&format!("cannot queue '{}': {}", arg, e)),
        },
        "ls" => {
            for (i, job) in queue.jobs().iter().enumerate() {
                view.say(&format!("{:>2}. {} [{:?}, retries {}]", i + 1, job.name, job.state, job.retries));
            }
        }
        other => view.say(&format!("unknown command '{}' (skip, cancel, rm <name>, add <name>, ls)", other)),
    }
}

/// Terminal rendering of queue events: one progress bar for the running job,
/// or JSON lines.
struct FetchView {
    json: bool,
    mp: MultiProgress,
    style: ProgressStyle,
    bar: Option<ProgressBar>,
    succeeded: usize,
    failed: usize,
    cancelled: usize,
}

impl FetchView {
    fn new(json: bool, verbose: bool) -> Self {
        let (mp, style) = init_job_progress(verbose);
        Self { json, mp, style, bar: None, succeeded: 0, failed: 0, cancelled: 0 }
    }

    fn say(&self, msg: &str) {
        if self.json {
            eprintln!("{}", msg);
        } else if self.mp.println(msg).is_err() {
            println!("{}", msg);
        }
    }

    fn print_json<T: serde::Serialize>(value: &T) {
        if let Ok(line) = serde_json::to_string(value) {
            println!("{}", line);
        }
    }

    fn apply_sample(bar: &ProgressBar, sample: &ProgressSample) {
        if let Some(p) = sample.percent {
            bar.set_position(p as u64);
        }
        let mut msg = String::new();
        if let (Some(done), Some(total)) = (sample.transferred_bytes, sample.total_bytes) {
            msg.push_str(&format!(
                "{} / {}  ",
                crate::util::human_bytes(done),
                crate::util::human_bytes(total)
            ));
        }
        if let Some(speed) = &sample.speed_text {
            msg.push_str(speed);
            msg.push_str("  ");
        }
        msg.push_str("ETA ");
        msg.push_str(&sample.eta_text);
        bar.set_message(msg);
    }

    fn on_progress(&mut self, name: &str, sample: &ProgressSample) {
        if self.json {
            Self::print_json(&serde_json::json!({"event": "progress", "name": name, "sample": sample}));
        } else if let Some(bar) = &self.bar {
            Self::apply_sample(bar, sample);
        }
    }

    fn on_event(&mut self, ev: QueueEvent) {
        match &ev {
            QueueEvent::Succeeded { .. } => self.succeeded += 1,
            QueueEvent::Failed { .. } => self.failed += 1,
            QueueEvent::Cancelled { .. } => self.cancelled += 1,
            _ => {}
        }
        if self.json {
            Self::print_json(&ev);
            return;
        }
        match ev {
            QueueEvent::Started { name, attempt } => {
                if attempt == 1 || self.bar.is_none() {
                    if let Some(old) = self.bar.take() {
                        old.finish_and_clear();
                    }
                    self.bar = Some(new_job_bar(&self.mp, &self.style, &name));
                } else if let Some(bar) = &self.bar {
                    bar.set_message(format!("attempt {}", attempt));
                }
            }
            QueueEvent::Retrying { retries, delay_secs, error, .. } => {
                if let Some(bar) = &self.bar {
                    bar.set_message(format!("retry {} in {}s: {}", retries, delay_secs, error));
                }
            }
            QueueEvent::Succeeded { name, last_sample } => {
                if let Some(bar) = self.bar.take() {
                    if let Some(s) = &last_sample {
                        Self::apply_sample(&bar, s);
                    }
                    bar.set_position(100);
                    bar.finish_with_message("done");
                }
                tracing::debug!("[fetch] {} done", name);
            }
            QueueEvent::Failed { category, error, .. } => {
                if let Some(bar) = self.bar.take() {
                    bar.abandon_with_message(format!("failed ({}): {}", category, error));
                }
            }
            QueueEvent::Cancelled { skipped, .. } => {
                if let Some(bar) = self.bar.take() {
                    bar.abandon_with_message(if skipped { "skipped" } else { "cancelled" });
                }
            }
            QueueEvent::Idle => {}
        }
    }

    fn finish(&mut self, elapsed_secs: f64) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        let _ = self.mp.clear();
        if self.json {
            Self::print_json(&serde_json::json!({
                "event": "summary",
                "succeeded": self.succeeded,
                "failed": self.failed,
                "cancelled": self.cancelled,
                "elapsed_secs": elapsed_secs,
            }));
        } else {
            print_summary(self.succeeded, self.failed, self.cancelled, elapsed_secs);
        }
    }
}
