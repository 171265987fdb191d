//! Console command parsing.
//!
//! One command per line:
//! `select N`, `deselect N`, `select-all`, `select-none`, `start [N ...]`,
//! `add N|all ML`, `empty N|all`, `exchange N|all`, `ok`, `finish`, `cancel`.

use perfusion_core::{ChamberId, Intent, Target};

pub const HELP: &str = "commands: select N | deselect N | select-all | select-none | start [N ...] | add N|all ML | empty N|all | exchange N|all | ok | finish | cancel";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Intent(Intent),
    Help,
}

fn chamber(tok: Option<&str>) -> Result<ChamberId, String> {
    let tok = tok.ok_or_else(|| "missing chamber number".to_string())?;
    tok.parse::<u8>()
        .ok()
        .and_then(ChamberId::new)
        .ok_or_else(|| format!("chamber must be 1-8, got '{tok}'"))
}

fn target(tok: Option<&str>) -> Result<Target, String> {
    match tok {
        Some(t) if t.eq_ignore_ascii_case("all") => Ok(Target::All),
        other => chamber(other).map(Target::One),
    }
}

/// Parse one line. Blank lines and `#` comments yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut toks = line.split_whitespace();
    let verb = toks.next().unwrap_or_default().to_ascii_lowercase();
    let intent = match verb.as_str() {
        "help" | "?" => return Ok(Some(Command::Help)),
        "select" => Intent::Activate(chamber(toks.next())?),
        "deselect" => Intent::Deactivate(chamber(toks.next())?),
        "select-all" => Intent::SelectAll(true),
        "select-none" => Intent::SelectAll(false),
        "start" => Intent::ConfirmSettings(
            toks.by_ref()
                .map(|t| chamber(Some(t)))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        "add" => {
            let target = target(toks.next())?;
            let raw = toks.next().ok_or_else(|| "missing volume in mL".to_string())?;
            let delta_ml: f32 = raw
                .parse()
                .map_err(|_| format!("invalid volume '{raw}'"))?;
            if !delta_ml.is_finite() {
                return Err(format!("invalid volume '{raw}'"));
            }
            Intent::AddVolume { target, delta_ml }
        }
        "empty" => Intent::SetVolumeZero(target(toks.next())?),
        "exchange" => Intent::StartExchange(target(toks.next())?),
        "ok" | "ack" => Intent::Acknowledge,
        "finish" => Intent::Finish,
        "cancel" => Intent::Cancel,
        other => return Err(format!("unknown command '{other}'")),
    };
    if let Some(extra) = toks.next() {
        return Err(format!("unexpected argument '{extra}'"));
    }
    Ok(Some(Command::Intent(intent)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn id(n: u8) -> ChamberId {
        ChamberId::new(n).unwrap()
    }

    fn intent(line: &str) -> Intent {
        match parse_line(line) {
            Ok(Some(Command::Intent(i))) => i,
            other => panic!("'{line}' parsed to {other:?}"),
        }
    }

    #[rstest]
    #[case("select 3", Intent::Activate(id(3)))]
    #[case("  DESELECT 8 ", Intent::Deactivate(id(8)))]
    #[case("select-all", Intent::SelectAll(true))]
    #[case("select-none", Intent::SelectAll(false))]
    #[case("start", Intent::ConfirmSettings(vec![]))]
    #[case("start 1 4 7", Intent::ConfirmSettings(vec![id(1), id(4), id(7)]))]
    #[case("add 2 -15", Intent::AddVolume { target: Target::One(id(2)), delta_ml: -15.0 })]
    #[case("add all 12.5", Intent::AddVolume { target: Target::All, delta_ml: 12.5 })]
    #[case("empty all", Intent::SetVolumeZero(Target::All))]
    #[case("exchange 5", Intent::StartExchange(Target::One(id(5))))]
    #[case("ok", Intent::Acknowledge)]
    #[case("finish", Intent::Finish)]
    #[case("cancel", Intent::Cancel)]
    fn parses_commands(#[case] line: &str, #[case] expected: Intent) {
        assert_eq!(intent(line), expected);
    }

    #[rstest]
    #[case("select 0", "1-8")]
    #[case("select 9", "1-8")]
    #[case("select", "missing chamber")]
    #[case("add 1", "missing volume")]
    #[case("add 1 lots", "invalid volume")]
    #[case("add 1 NaN", "invalid volume")]
    #[case("exchange 2 3", "unexpected argument")]
    #[case("pump 1", "unknown command")]
    fn rejects_bad_input(#[case] line: &str, #[case] needle: &str) {
        let err = parse_line(line).unwrap_err();
        assert!(err.contains(needle), "{err}");
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line("# wash after run"), Ok(None));
        assert_eq!(parse_line("help"), Ok(Some(Command::Help)));
    }
}
