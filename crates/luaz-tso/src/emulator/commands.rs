//! Emulated TSO command processors: TIME, LISTCAT, LISTALC, LISTDS, SEND, PARMLIB.

use chrono::NaiveDateTime;

use crate::operands::ParsedCommand;

use super::catalog::Catalog;
use super::dd_table::DdTable;

/// Result of running one command processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Lines written to SYSTSPRT / the terminal.
    pub output: Vec<String>,
    pub rc: i32,
}

impl CommandResult {
    pub(crate) fn ok(lines: Vec<String>) -> Self {
        Self { output: lines, rc: 0 }
    }

    pub(crate) fn error(msg: &str) -> Self {
        Self {
            output: vec![msg.to_string()],
            rc: 12,
        }
    }
}

/// What a command processor can see of the session.
pub struct CommandEnv<'a> {
    pub userid: &'a str,
    pub dd: &'a DdTable,
    pub catalog: &'a Catalog,
    pub authcmd: &'a [String],
    pub now: NaiveDateTime,
    pub logon: NaiveDateTime,
}

/// Run a parsed command.
pub fn execute(env: &CommandEnv<'_>, cmd: &ParsedCommand) -> CommandResult {
    match cmd.name.as_str() {
        "TIME" => cmd_time(env),
        "LISTCAT" | "LISTC" => cmd_listcat(env, cmd),
        "LISTALC" | "LISTA" => cmd_listalc(env, cmd),
        "LISTDS" | "LISTD" => cmd_listds(env, cmd),
        "SEND" | "SE" => cmd_send(cmd),
        "PARMLIB" => cmd_parmlib(env, cmd),
        "" => CommandResult::error("IKJ56500I COMMAND NAME MISSING"),
        _ => CommandResult::error(&format!("IKJ56500I COMMAND {} NOT FOUND", cmd.name)),
    }
}

// ---------------------------------------------------------------------------
// TIME
// ---------------------------------------------------------------------------

fn cmd_time(env: &CommandEnv<'_>) -> CommandResult {
    let session = (env.now - env.logon).num_seconds().max(0);
    let (h, m, s) = (session / 3600, (session / 60) % 60, session % 60);
    CommandResult::ok(vec![format!(
        "IKJ56650I TIME-{} CPU-00:00:00 SERVICE-{} SESSION-{h:02}:{m:02}:{s:02} {}",
        env.now.format("%I:%M:%S %p."),
        1000 + session,
        env.now.format("%B %-d,%Y").to_string().to_ascii_uppercase(),
    )])
}

// ---------------------------------------------------------------------------
// LISTCAT
// ---------------------------------------------------------------------------

fn cmd_listcat(env: &CommandEnv<'_>, cmd: &ParsedCommand) -> CommandResult {
    if let Some(entry) = cmd
        .keyword(&["ENTRIES", "ENT"])
        .or_else(|| cmd.first_positional())
    {
        return match env.catalog.get(entry) {
            Some(ds) => CommandResult::ok(vec![format!("NONVSAM ------- {}", ds.name)]),
            None => not_found(entry),
        };
    }

    let level = cmd.keyword(&["LEVEL", "LVL"]).unwrap_or(env.userid);
    let matches = env.catalog.list_level(level);
    if matches.is_empty() {
        return not_found(level);
    }
    CommandResult::ok(
        matches
            .iter()
            .map(|ds| format!("NONVSAM ------- {}", ds.name))
            .collect(),
    )
}

fn not_found(entry: &str) -> CommandResult {
    CommandResult {
        output: vec![
            format!("IDC3012I ENTRY {entry} NOT FOUND"),
            "IDC3009I ** VSAM CATALOG RETURN CODE IS 8 - REASON CODE IS IGG0CLEG-42".to_string(),
            format!("IDC1566I ** {entry} NOT LISTED"),
        ],
        rc: 4,
    }
}

// ---------------------------------------------------------------------------
// LISTALC
// ---------------------------------------------------------------------------

fn cmd_listalc(env: &CommandEnv<'_>, cmd: &ParsedCommand) -> CommandResult {
    let entries = env.dd.list();
    if entries.is_empty() {
        return CommandResult::ok(vec!["IKJ56246I NO DATA SETS CURRENTLY ALLOCATED".to_string()]);
    }
    let mut lines = vec!["--DDNAME---DISP--".to_string()];
    for e in entries {
        lines.push(e.dsname.clone());
        if cmd.has_flag("STATUS") {
            let disp = if e.temporary { "DELETE" } else { "KEEP" };
            lines.push(format!("  {:<8}  {},{}", e.ddname, e.status.keyword(), disp));
        }
    }
    CommandResult::ok(lines)
}

// ---------------------------------------------------------------------------
// LISTDS
// ---------------------------------------------------------------------------

fn cmd_listds(env: &CommandEnv<'_>, cmd: &ParsedCommand) -> CommandResult {
    let Some(dsn) = cmd.first_positional().or_else(|| cmd.keyword(&["DA", "DSNAME"])) else {
        return CommandResult::error("IKJ56702I MISSING DATA SET NAME");
    };
    let Some(ds) = env.catalog.get(dsn) else {
        return CommandResult {
            output: vec![dsn.to_ascii_uppercase(), "IKJ58503I DATA SET NOT IN CATALOG".to_string()],
            rc: 4,
        };
    };
    let mut lines = vec![
        ds.name.clone(),
        "--RECFM-LRECL-BLKSIZE-DSORG".to_string(),
        format!("  {}  {}", ds.recfm(), ds.dsorg()),
    ];
    if cmd.has_flag("STATUS") {
        lines.push("--DDNAME---DISP--".to_string());
        for e in env.dd.list().into_iter().filter(|e| e.dsname == ds.name) {
            lines.push(format!("  {:<8}  {}", e.ddname, e.status.keyword()));
        }
    }
    CommandResult::ok(lines)
}

// ---------------------------------------------------------------------------
// SEND
// ---------------------------------------------------------------------------

fn cmd_send(cmd: &ParsedCommand) -> CommandResult {
    match cmd.first_positional() {
        Some(text) => CommandResult::ok(vec![text.to_string()]),
        None => CommandResult::error("IKJ56702I MISSING MESSAGE TEXT"),
    }
}

// ---------------------------------------------------------------------------
// PARMLIB (authorized)
// ---------------------------------------------------------------------------

fn cmd_parmlib(env: &CommandEnv<'_>, cmd: &ParsedCommand) -> CommandResult {
    if !(cmd.has_flag("LIST") || (cmd.flags.is_empty() && cmd.positional.is_empty())) {
        return CommandResult::error("IKJ56712I INVALID KEYWORD");
    }
    let mut lines = vec!["IKJ745I TSO/E PARMLIB SETTINGS :".to_string()];
    lines.push(format!("  AUTHCMD NAMES( {} )", env.authcmd.join(" ")));
    CommandResult::ok(lines)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::dair::DatasetStatus;
    use crate::emulator::catalog::Dataset;
    use crate::operands::parse_command;
    use chrono::NaiveDate;

    struct Fixture {
        dd: DdTable,
        catalog: Catalog,
        authcmd: Vec<String>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut catalog = Catalog::new();
            catalog.define(Dataset::sequential("IBMUSER.DATA", 80));
            catalog.define(Dataset::library("IBMUSER.EXEC", &["LUTSO"]));
            let mut dd = DdTable::new();
            dd.allocate(Some("SYSEXEC"), "IBMUSER.EXEC", DatasetStatus::Shr, false)
                .unwrap();
            Self {
                dd,
                catalog,
                authcmd: vec!["PARMLIB".to_string()],
            }
        }

        fn run(&self, line: &str) -> CommandResult {
            let now = NaiveDate::from_ymd_opt(2026, 10, 19)
                .unwrap()
                .and_hms_opt(14, 5, 9)
                .unwrap();
            let env = CommandEnv {
                userid: "IBMUSER",
                dd: &self.dd,
                catalog: &self.catalog,
                authcmd: &self.authcmd,
                now,
                logon: now - chrono::Duration::seconds(62),
            };
            execute(&env, &parse_command(line))
        }
    }

    #[test]
    fn time_line_format() {
        let r = Fixture::new().run("TIME");
        assert_eq!(r.rc, 0);
        assert_eq!(
            r.output[0],
            "IKJ56650I TIME-02:05:09 PM. CPU-00:00:00 SERVICE-1062 SESSION-00:01:02 OCTOBER 19,2026"
        );
    }

    #[test]
    fn listcat_level_not_found() {
        let r = Fixture::new().run("LISTCAT LEVEL(NOSUCH)");
        assert_eq!(r.rc, 4);
        assert_eq!(r.output[0], "IDC3012I ENTRY NOSUCH NOT FOUND");
    }

    #[test]
    fn listcat_default_level_is_userid() {
        let r = Fixture::new().run("LISTCAT");
        assert_eq!(r.rc, 0);
        assert!(r.output.contains(&"NONVSAM ------- IBMUSER.DATA".to_string()));
    }

    #[test]
    fn listcat_entries() {
        let f = Fixture::new();
        assert_eq!(f.run("LISTCAT ENTRIES('IBMUSER.DATA')").rc, 0);
        assert_eq!(f.run("LISTCAT ENT(NO.SUCH)").rc, 4);
    }

    #[test]
    fn listalc_status() {
        let r = Fixture::new().run("LISTALC STATUS");
        assert_eq!(r.rc, 0);
        assert!(r.output.iter().any(|l| l.contains("SYSEXEC") && l.contains("SHR,KEEP")));
    }

    #[test]
    fn listds_not_in_catalog() {
        let r = Fixture::new().run("LISTDS 'NO.SUCH.DATASET'");
        assert_eq!(r.rc, 4);
        assert!(r.output[1].contains("NOT IN CATALOG"));
    }

    #[test]
    fn listds_library() {
        let r = Fixture::new().run("LISTDS 'IBMUSER.EXEC' STATUS");
        assert_eq!(r.rc, 0);
        assert!(r.output[2].contains("PO"));
        assert!(r.output.iter().any(|l| l.contains("SYSEXEC")));
    }

    #[test]
    fn send_echoes_text() {
        let r = Fixture::new().run("SEND 'hello world'");
        assert_eq!(r.output, vec!["hello world".to_string()]);
    }

    #[test]
    fn unknown_command() {
        let r = Fixture::new().run("XYZZY");
        assert_eq!(r.rc, 12);
        assert_eq!(r.output[0], "IKJ56500I COMMAND XYZZY NOT FOUND");
    }

    #[test]
    fn parmlib_lists_authcmd() {
        let r = Fixture::new().run("PARMLIB LIST");
        assert_eq!(r.rc, 0);
        assert!(r.output[1].contains("PARMLIB"));
    }
}
