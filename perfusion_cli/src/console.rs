//! Line-oriented presentation: status and notices to stdout, operator
//! commands from stdin.

use std::io::{BufRead, Write};

use crossbeam_channel as xch;
use perfusion_core::{Intent, Notice, Presenter, Stage, StatusSnapshot};
use serde_json::json;

use crate::commands::{Command, HELP, parse_line};

pub struct ConsolePresenter<W: Write> {
    out: W,
    json: bool,
}

impl ConsolePresenter<std::io::Stdout> {
    pub fn stdout(json: bool) -> Self {
        Self::new(std::io::stdout(), json)
    }
}

impl<W: Write> ConsolePresenter<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self { out, json }
    }

    fn emit(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{line}").and_then(|()| self.out.flush()) {
            tracing::debug!(error = %e, "console write failed");
        }
    }
}

fn stage_name(stage: Stage) -> &'static str {
    match stage {
        Stage::Settings => "settings",
        Stage::Monitoring => "monitoring",
    }
}

fn ids(list: &[perfusion_core::ChamberId]) -> String {
    list.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn status_json(s: &StatusSnapshot) -> serde_json::Value {
    let chambers: Vec<_> = s
        .chambers
        .iter()
        .map(|c| {
            json!({
                "id": c.id.get(),
                "in_use": c.in_use,
                "status": c.status.to_string(),
                "last_changed": c.last_changed,
                "media_volume_ml": c.media_volume_ml,
            })
        })
        .collect();
    json!({
        "type": "status",
        "stage": stage_name(s.stage),
        "runtime": s.runtime,
        "heartbeat": s.heartbeat_on,
        "chambers": chambers,
    })
}

pub fn notice_json(n: &Notice) -> serde_json::Value {
    match n {
        Notice::ExperimentStarted(list) => json!({
            "type": "notice", "kind": "experiment_started",
            "chambers": list.iter().map(|c| c.get()).collect::<Vec<_>>(),
        }),
        Notice::InsufficientVolume { id, volume_ml, required_ml } => json!({
            "type": "notice", "kind": "insufficient_volume",
            "chamber": id.get(), "volume_ml": volume_ml, "required_ml": required_ml,
        }),
        Notice::PhaseStarted { id, phase, duration, source } => json!({
            "type": "notice", "kind": "phase_started",
            "chamber": id.get(), "phase": format!("{phase:?}"),
            "duration_ms": duration.as_millis() as u64, "source": source.as_str(),
        }),
        Notice::ExchangeCompleted { id, removed_ml, volume_ml } => json!({
            "type": "notice", "kind": "exchange_completed",
            "chamber": id.get(), "removed_ml": removed_ml, "volume_ml": volume_ml,
        }),
        Notice::ExchangeCancelled(id) => json!({
            "type": "notice", "kind": "exchange_cancelled", "chamber": id.get(),
        }),
        Notice::Ignored(why) => json!({ "type": "notice", "kind": "ignored", "reason": why }),
        Notice::WashPrompt => json!({ "type": "notice", "kind": "wash_prompt" }),
    }
}

pub fn notice_text(n: &Notice) -> String {
    match n {
        Notice::ExperimentStarted(list) => format!("experiment started: chambers {}", ids(list)),
        Notice::InsufficientVolume { id, volume_ml, required_ml } => format!(
            "chamber {id}: only {volume_ml:.1} mL tracked, an exchange needs {required_ml:.1} mL. Add media, then type 'ok'"
        ),
        Notice::PhaseStarted { id, phase, duration, source } => format!(
            "chamber {id}: {phase:?} for {:.1} s ({})",
            duration.as_secs_f32(),
            source.as_str()
        ),
        Notice::ExchangeCompleted { id, volume_ml, .. } => {
            format!("chamber {id}: exchange complete, {volume_ml:.1} mL left")
        }
        Notice::ExchangeCancelled(id) => format!("chamber {id}: exchange cancelled"),
        Notice::Ignored(why) => format!("ignored: {why}"),
        Notice::WashPrompt => {
            "experiment finished. Wash the lines before the next run.".to_string()
        }
    }
}

pub fn status_text(s: &StatusSnapshot) -> String {
    let mut out = match (&s.runtime, s.stage) {
        (Some(rt), _) => format!("[{} {rt}] {}", stage_name(s.stage), if s.heartbeat_on { "*" } else { "." }),
        (None, stage) => format!("[{}]", stage_name(stage)),
    };
    let in_use: Vec<_> = s.chambers.iter().filter(|c| c.in_use).collect();
    if in_use.is_empty() {
        out.push_str(" no chambers selected");
    }
    for c in in_use {
        out.push_str(&format!(
            "\n  chamber {}  {:<16} {:>6.1} mL",
            c.id, c.status.to_string(), c.media_volume_ml
        ));
        if let Some(changed) = &c.last_changed {
            out.push_str(&format!("  changed {changed}"));
        }
    }
    out
}

impl<W: Write> Presenter for ConsolePresenter<W> {
    fn render(&mut self, snapshot: &StatusSnapshot) {
        let line = if self.json {
            status_json(snapshot).to_string()
        } else {
            status_text(snapshot)
        };
        self.emit(&line);
    }

    fn notify(&mut self, notice: Notice) {
        let line = if self.json {
            notice_json(&notice).to_string()
        } else {
            notice_text(&notice)
        };
        self.emit(&line);
    }
}

/// Read commands from `input` on a helper thread and forward intents.
/// The sender is dropped at end of input, which closes the source.
pub fn spawn_reader<R: BufRead + Send + 'static>(
    input: R,
    tx: xch::Sender<Intent>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for line in input.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    break;
                }
            };
            match parse_line(&line) {
                Ok(Some(Command::Intent(intent))) => {
                    tracing::debug!(?intent, "operator intent");
                    if tx.send(intent).is_err() {
                        break;
                    }
                }
                Ok(Some(Command::Help)) => eprintln!("{HELP}"),
                Ok(None) => {}
                Err(msg) => eprintln!("error: {msg} ({HELP})"),
            }
        }
        tracing::trace!("operator input closed");
    })
}
