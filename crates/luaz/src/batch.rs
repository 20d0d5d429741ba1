//! Batch scripts: one `tso.*` call per line.
//!
//! ```text
//! # comments start with '#' or '*'
//! alloc FILE(IN) DA('IBMUSER.INPUT.DATA') SHR
//! cmd LISTDS 'IBMUSER.INPUT.DATA'
//! authcmd PARMLIB LIST
//! msg 1 input checked
//! free IN
//! exit 0
//! ```
//!
//! The whole file is parsed before anything runs, so a malformed line
//! never leaves a half-finished session behind.

use miette::{miette, Result};
use tracing::{debug, warn};

use luaz_tso::script::MAX_EXIT_CODE;
use luaz_tso::{CommandOptions, SimHost, TsoScript};

use crate::output::BatchStep;

/// Return code an operation error contributes to the implicit exit code.
pub const ERROR_RC: i32 = 12;

/// One parsed batch line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Cmd { text: String, authorized: bool },
    Alloc(String),
    Free(String),
    Msg { level: Option<i64>, text: String },
    Exit(Option<i64>),
}

impl BatchOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cmd { authorized: false, .. } => "cmd",
            Self::Cmd { authorized: true, .. } => "authcmd",
            Self::Alloc(_) => "alloc",
            Self::Free(_) => "free",
            Self::Msg { .. } => "msg",
            Self::Exit(_) => "exit",
        }
    }
}

/// Parse a batch script into numbered operations.
pub fn parse(source: &str) -> Result<Vec<(usize, BatchOp)>> {
    let mut ops = Vec::new();
    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('*') {
            continue;
        }
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        let need = |what: &str| -> Result<String> {
            if rest.is_empty() {
                Err(miette!("line {line_no}: {verb} needs {what}"))
            } else {
                Ok(rest.to_string())
            }
        };
        let op = match verb.to_ascii_lowercase().as_str() {
            "cmd" => BatchOp::Cmd {
                text: need("a command")?,
                authorized: false,
            },
            "authcmd" => BatchOp::Cmd {
                text: need("a command")?,
                authorized: true,
            },
            "alloc" => BatchOp::Alloc(need("an allocation")?),
            "free" => BatchOp::Free(need("a DDname")?),
            "msg" => parse_msg(rest),
            "exit" => BatchOp::Exit(if rest.is_empty() {
                None
            } else {
                Some(
                    rest.parse()
                        .map_err(|_| miette!("line {line_no}: exit code '{rest}' is not a number"))?,
                )
            }),
            other => return Err(miette!("line {line_no}: unknown operation '{other}'")),
        };
        ops.push((line_no, op));
    }
    Ok(ops)
}

/// `msg [level] text`: a leading number is the level.
fn parse_msg(rest: &str) -> BatchOp {
    if let Some((first, text)) = rest.split_once(char::is_whitespace) {
        if let Ok(level) = first.parse::<i64>() {
            return BatchOp::Msg {
                level: Some(level),
                text: text.trim().to_string(),
            };
        }
    }
    BatchOp::Msg {
        level: None,
        text: rest.to_string(),
    }
}

/// Result of running a whole script.
#[derive(Debug)]
pub struct BatchRun {
    pub steps: Vec<BatchStep>,
    pub exit_code: i32,
    pub released: usize,
    pub failed: bool,
}

/// Run `ops`, then exit the script.
///
/// Without an explicit `exit` the script ends with the highest return code
/// seen, an operation error counting as [`ERROR_RC`].
pub fn run(mut tso: TsoScript<SimHost>, ops: Vec<(usize, BatchOp)>) -> BatchRun {
    let mut steps = Vec::new();
    let mut highest = 0;
    let mut requested = None;
    let mut failed = false;

    for (line, op) in ops {
        debug!(line, op = op.name(), "batch step");
        let mut step = BatchStep {
            line,
            op: op.name().to_string(),
            return_code: None,
            lines: Vec::new(),
            error: None,
            code: None,
            warnings: Vec::new(),
        };
        let seen = tso.context().host().terminal().len();
        let result = match &op {
            BatchOp::Cmd { text, authorized } => {
                let options = CommandOptions {
                    authorized: *authorized,
                    ..Default::default()
                };
                tso.cmd(text, options).map(|r| {
                    step.lines = r.lines;
                    step.warnings.extend(r.cleanup);
                    r.rc
                })
            }
            BatchOp::Alloc(spec) => tso.alloc(spec),
            BatchOp::Free(spec) => tso.free(spec),
            BatchOp::Msg { level, text } => tso.msg(text, *level),
            BatchOp::Exit(code) => {
                requested = Some(*code);
                steps.push(step);
                break;
            }
        };
        let terminal = &tso.context().host().terminal()[seen..];
        step.lines.extend(terminal.iter().map(|(_, line)| line.clone()));
        for failure in tso.take_cleanup_failures() {
            warn!(line, error = %failure, "cleanup failed");
            step.warnings.push(failure.to_string());
        }
        match result {
            Ok(rc) => {
                highest = highest.max(rc);
                step.return_code = Some(rc);
            }
            Err(e) => {
                highest = highest.max(ERROR_RC);
                failed = true;
                step.error = Some(e.message);
                step.code = Some(e.code);
            }
        }
        steps.push(step);
    }

    let code = requested.unwrap_or(Some(i64::from(highest.min(MAX_EXIT_CODE as i32))));
    let exit_line = steps.last().map_or(0, |s| s.line);
    match tso.exit(code) {
        Ok(exit) => BatchRun {
            steps,
            exit_code: exit.code,
            released: exit.released,
            failed: failed || exit.failed > 0,
        },
        Err(e) => {
            steps.push(BatchStep {
                line: exit_line,
                op: "exit".to_string(),
                return_code: None,
                lines: Vec::new(),
                error: Some(e.message),
                code: Some(e.code),
                warnings: Vec::new(),
            });
            BatchRun {
                steps,
                exit_code: ERROR_RC,
                released: 0,
                failed: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luaz_tso::{TsoConfig, TsoContext};

    fn script() -> TsoScript<SimHost> {
        TsoScript::new(TsoContext::new(SimHost::new(), TsoConfig::default()))
    }

    #[test]
    fn parses_operations() {
        let ops = parse("# setup\n\nalloc X\ncmd TIME\n* note\nmsg 1 careful\nmsg hello world\nexit 4\n")
            .unwrap();
        assert_eq!(
            ops,
            vec![
                (3, BatchOp::Alloc("X".to_string())),
                (
                    4,
                    BatchOp::Cmd {
                        text: "TIME".to_string(),
                        authorized: false
                    }
                ),
                (
                    6,
                    BatchOp::Msg {
                        level: Some(1),
                        text: "careful".to_string()
                    }
                ),
                (
                    7,
                    BatchOp::Msg {
                        level: None,
                        text: "hello world".to_string()
                    }
                ),
                (8, BatchOp::Exit(Some(4))),
            ]
        );
    }

    #[test]
    fn rejects_unknown_operations() {
        let err = parse("cmd TIME\nsubmit JOB").unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(parse("alloc").is_err());
        assert!(parse("exit soon").is_err());
    }

    #[test]
    fn exit_stops_the_script() {
        let ops = parse("alloc X\nexit 3\ncmd TIME").unwrap();
        let run = run(script(), ops);
        assert_eq!(run.exit_code, 3);
        assert_eq!(run.steps.len(), 2);
        assert_eq!(run.released, 1);
    }

    #[test]
    fn implicit_exit_takes_the_highest_rc() {
        let ops = parse("cmd TIME\ncmd LISTCAT LEVEL(NOSUCH)").unwrap();
        let run = run(script(), ops);
        assert_eq!(run.exit_code, 4);
        assert!(!run.failed);
    }

    #[test]
    fn errors_are_recorded_and_the_script_continues() {
        let ops = parse("free NOTMINE\ncmd SEND 'after'").unwrap();
        let run = run(script(), ops);
        assert_eq!(run.steps[0].code, Some(30005));
        assert_eq!(run.steps[1].lines, vec!["after".to_string()]);
        assert_eq!(run.exit_code, ERROR_RC);
        assert!(run.failed);
    }

    #[test]
    fn cleanup_failures_are_reported_per_step() {
        let host = SimHost::builder().free_failure(0x0438).build();
        let tso = TsoScript::new(TsoContext::new(host, TsoConfig::default()));
        let ops = parse("cmd TIME\ncmd SEND 'next'").unwrap();
        let run = run(tso, ops);
        assert_eq!(run.exit_code, 0);
        for step in &run.steps {
            assert_eq!(step.return_code, Some(0));
            assert_eq!(step.warnings.len(), 1, "{step:?}");
            assert!(step.warnings[0].contains("cleanup of LUZ"));
        }
    }

    #[test]
    fn messages_are_collected() {
        let ops = parse("msg 2 broken").unwrap();
        let run = run(script(), ops);
        assert_eq!(run.steps[0].lines, vec!["broken".to_string()]);
        assert_eq!(run.steps[0].return_code, Some(0));
    }
}
