use danmaku::format::{self, ExportOptions};
use danmaku::{
    Blocklist, BlocklistConfig, CommentId, DanmuEngine, DanmuLoader, DanmuStore, EngineConfig,
    FileSource, PoolStatistics, Snapshot, StatisticsAggregator, StyleClass,
};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::cli::{ReplayOutput, SeekEvent};
use crate::error::{AppError, Result};

/// Records per store batch when loading files.
const LOAD_CHUNK: usize = 1024;

/// Parameters of a replay run.
#[derive(Debug, Clone)]
pub struct ReplayPlan {
    pub from: f64,
    pub to: Option<f64>,
    pub step: f64,
    pub seeks: Vec<SeekEvent>,
    pub rate: f64,
}

/// What happened to each comment during a replay.
#[derive(Debug, Default)]
pub struct ReplaySummary {
    pub ticks: u64,
    pub seeks: u64,
    /// Distinct comments placed at least once
    pub shown: usize,
    /// Comments never placed, by last suppression reason
    pub suppressed: BTreeMap<&'static str, usize>,
    pub peak_visible: usize,
    pub peak_time: Option<f64>,
    /// Peak on-screen count per style class
    pub peak_by_class: BTreeMap<StyleClass, usize>,
}

pub struct CommandExecutor {
    config: EngineConfig,
}

impl CommandExecutor {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    async fn load(&self, input: &Path) -> Result<DanmuStore> {
        let store = DanmuStore::new();
        let mut source = FileSource::new(input, LOAD_CHUNK);
        let report = DanmuLoader::new(store.clone())
            .skip_invalid(true)
            .run(&mut source)
            .await?;
        if report.rejected_records > 0 {
            warn!(
                rejected = report.rejected_records,
                "Some comments failed validation and were skipped"
            );
        }
        Ok(store)
    }

    async fn load_blocklist(path: &Path) -> Result<Blocklist> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: BlocklistConfig = serde_json::from_str(&content)?;
        Ok(Blocklist::from_config(&config)?)
    }

    pub async fn replay(
        &self,
        input: &Path,
        plan: ReplayPlan,
        blocklist: Option<&Path>,
        output: ReplayOutput,
    ) -> Result<()> {
        if !(plan.step.is_finite() && plan.step > 0.0) {
            return Err(AppError::InvalidInput(format!(
                "step must be positive, got {}",
                plan.step
            )));
        }

        let store = self.load(input).await?;
        let mut engine = DanmuEngine::new(store.clone(), self.config.clone())?;
        engine.on_rate_change(plan.rate)?;
        if let Some(path) = blocklist {
            engine.set_blocklist(Self::load_blocklist(path).await?);
        }

        let end = match plan.to {
            Some(to) => to,
            None => match store.time_span() {
                Some((_, last)) => last + self.config.delay + self.config.max_visible_span(),
                None => plan.from,
            },
        };
        info!(from = plan.from, to = end, comments = store.len(), "Starting replay");

        let stdout = io::stdout();
        let mut out = stdout.lock();
        let mut seeks: VecDeque<SeekEvent> = plan.seeks.into_iter().collect();
        let mut summary = ReplaySummary::default();
        let mut decisions: FxHashMap<CommentId, Option<&'static str>> = FxHashMap::default();
        let advance = plan.step * plan.rate;

        let mut time = plan.from;
        let mut previous: Option<f64> = None;
        while time <= end {
            match seeks.front() {
                Some(seek) if seek.at <= time => {
                    debug!(at = seek.at, to = seek.to, "Scripted seek");
                    time = seek.to;
                    engine.on_seek(time);
                    seeks.pop_front();
                    summary.seeks += 1;
                    previous = None;
                }
                _ => {
                    engine.on_tick(time);
                    summary.ticks += 1;
                }
            }

            let snapshot = engine.snapshot();
            record_decisions(&engine, &store, previous, time, &mut decisions);
            update_peaks(&mut summary, &snapshot);
            if output == ReplayOutput::Json {
                serde_json::to_writer(&mut out, &snapshot)?;
                writeln!(out)?;
            }

            previous = Some(time);
            time += advance;
        }

        summary.shown = decisions.values().filter(|d| d.is_none()).count();
        for kind in decisions.values().flatten() {
            *summary.suppressed.entry(*kind).or_insert(0) += 1;
        }

        match output {
            ReplayOutput::Json => {
                info!(shown = summary.shown, ticks = summary.ticks, "Replay finished");
            }
            ReplayOutput::Summary => writeln!(out, "{}", format_summary(&summary))?,
        }
        Ok(())
    }

    pub async fn stats(&self, input: &Path, bucket: f64, top: usize, json: bool) -> Result<()> {
        let store = self.load(input).await?;
        let mut aggregator = StatisticsAggregator::with_config(top, top, bucket);
        for entry in store.all() {
            aggregator.record(&entry.record, entry.flags.blocked);
        }
        let stats = aggregator.finalize();

        let rendered = if json {
            serde_json::to_string_pretty(&stats)?
        } else {
            format_stats(&stats)
        };
        println!("{rendered}");
        Ok(())
    }

    pub async fn convert(
        &self,
        input: &Path,
        output: &Path,
        options: ExportOptions,
    ) -> Result<()> {
        if format::Format::from_path(output).is_none() {
            return Err(AppError::InvalidInput(format!(
                "cannot tell the output format of {}",
                output.display()
            )));
        }
        let store = self.load(input).await?;
        format::write_file(output, &store.all(), &options).await?;
        info!(
            input = %input.display(),
            output = %output.display(),
            comments = store.len(),
            "Converted comment file"
        );
        Ok(())
    }
}

/// Note the outcome of every comment that became due since the previous
/// frame. A later placement overrides an earlier suppression.
fn record_decisions(
    engine: &DanmuEngine,
    store: &DanmuStore,
    previous: Option<f64>,
    time: f64,
    decisions: &mut FxHashMap<CommentId, Option<&'static str>>,
) {
    let delay = engine.config().delay;
    let from = match previous {
        Some(previous) if previous < time => previous,
        // after a seek the rebuilt window is what was decided
        _ => time - engine.config().lookback(),
    };
    for entry in store.query_range(from - delay, time - delay) {
        let id = entry.id();
        let outcome = if engine.is_placed(id) {
            None
        } else {
            match engine.explain(id) {
                Some(reason) => Some(reason.kind()),
                None => continue,
            }
        };
        match decisions.get(&id) {
            Some(None) => {}
            _ => {
                decisions.insert(id, outcome);
            }
        }
    }
}

fn update_peaks(summary: &mut ReplaySummary, snapshot: &Snapshot) {
    if snapshot.len() > summary.peak_visible {
        summary.peak_visible = snapshot.len();
        summary.peak_time = snapshot.time;
    }
    for class in StyleClass::ALL {
        let count = snapshot.count(class);
        let peak = summary.peak_by_class.entry(class).or_insert(0);
        *peak = (*peak).max(count);
    }
}

fn format_summary(summary: &ReplaySummary) -> String {
    let mut lines = vec![
        format!("Ticks:         {}", summary.ticks),
        format!("Seeks:         {}", summary.seeks),
        format!("Shown:         {}", summary.shown),
    ];
    for (kind, count) in &summary.suppressed {
        lines.push(format!("Suppressed:    {count} ({kind})"));
    }
    match summary.peak_time {
        Some(time) => lines.push(format!(
            "Peak visible:  {} at {:.2}s",
            summary.peak_visible, time
        )),
        None => lines.push(format!("Peak visible:  {}", summary.peak_visible)),
    }
    for (class, peak) in &summary.peak_by_class {
        if *peak > 0 {
            lines.push(format!("  {:<12} {peak}", class.to_string()));
        }
    }
    lines.join("\n")
}

fn format_stats(stats: &PoolStatistics) -> String {
    let mut lines = vec![format!(
        "Comments: {} ({} blocked, {} from guests)",
        stats.total_count, stats.blocked_count, stats.guest_count
    )];
    if let (Some(first), Some(last)) = (stats.first_timestamp, stats.last_timestamp) {
        lines.push(format!("Span:     {first:.2}s - {last:.2}s"));
    }
    lines.push("Styles:".to_string());
    for entry in &stats.style_counts {
        lines.push(format!("  {:<12} {}", entry.style.to_string(), entry.count));
    }
    if !stats.top_senders.is_empty() {
        lines.push("Top senders:".to_string());
        for sender in &stats.top_senders {
            lines.push(format!("  {:<20} {}", sender.sender, sender.comment_count));
        }
    }
    if !stats.word_frequency.is_empty() {
        lines.push("Top words:".to_string());
        for word in &stats.word_frequency {
            lines.push(format!("  {:<20} {}", word.word, word.count));
        }
    }
    if let Some(peak) = stats.peak() {
        lines.push(format!(
            "Busiest:  {:.0}s - {:.0}s ({} comments)",
            peak.start,
            peak.start + stats.bucket_secs,
            peak.count
        ));
    }
    lines.join("\n")
}
