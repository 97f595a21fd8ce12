//! Command output parsing and vendor error-code classification
//!
//! Successful transport says nothing about whether the database accepted
//! the command. SQL*Plus and the broker CLI both print `ORA-NNNNN` codes on
//! stdout and exit zero, so output is scanned on every call.

use oradb_common::crd::DatabaseRole;

/// Vendor error code, e.g. `ORA-16525`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OraCode(pub u32);

impl OraCode {
    /// Broker not yet available
    pub const BROKER_NOT_AVAILABLE: OraCode = OraCode(16525);
    /// Broker configuration does not exist
    pub const CONFIGURATION_MISSING: OraCode = OraCode(16532);
    /// Invalid username/password
    pub const INVALID_CREDENTIALS: OraCode = OraCode(1017);
    /// Instance not available
    pub const NOT_AVAILABLE: OraCode = OraCode(1034);
    /// Listener does not know the service
    pub const UNKNOWN_SERVICE: OraCode = OraCode(12514);
    /// No listener
    pub const NO_LISTENER: OraCode = OraCode(12541);

    /// How callers should treat this code
    pub fn classify(&self) -> OraClass {
        match *self {
            Self::BROKER_NOT_AVAILABLE
            | Self::NOT_AVAILABLE
            | Self::UNKNOWN_SERVICE
            | Self::NO_LISTENER => OraClass::Transient,
            Self::CONFIGURATION_MISSING => OraClass::BootstrapSignal,
            _ => OraClass::Permanent,
        }
    }
}

impl std::fmt::Display for OraCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ORA-{:05}", self.0)
    }
}

/// Classification of a vendor code
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OraClass {
    /// Retry later without changing phase
    Transient,
    /// The broker has no configuration; bootstrap instead of add
    BootstrapSignal,
    /// Fail the resource
    Permanent,
}

/// Logging and flashback state of a database
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogFlags {
    /// `LOG_MODE = ARCHIVELOG`
    pub archive_log: bool,
    /// `FLASHBACK_ON = YES`
    pub flashback: bool,
    /// `FORCE_LOGGING = YES`
    pub force_logging: bool,
}

/// Output of a command that ran
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Output with only stdout
    pub fn stdout(s: impl Into<String>) -> Self {
        Self {
            stdout: s.into(),
            stderr: String::new(),
        }
    }

    /// Every vendor code in stdout and stderr, in order of appearance
    pub fn ora_codes(&self) -> Vec<OraCode> {
        self.stdout
            .lines()
            .chain(self.stderr.lines())
            .flat_map(codes_in_line)
            .collect()
    }

    /// First code that is not a bootstrap signal, with the line it appeared on
    pub fn first_domain_error(&self) -> Option<(OraCode, String)> {
        self.stdout
            .lines()
            .chain(self.stderr.lines())
            .flat_map(|line| codes_in_line(line).into_iter().map(move |c| (c, line)))
            .find(|(code, _)| code.classify() != OraClass::BootstrapSignal)
            .map(|(code, line)| (code, line.trim().to_string()))
    }

    /// True when stdout contains `code`
    pub fn has_code(&self, code: OraCode) -> bool {
        self.ora_codes().contains(&code)
    }

    /// Data rows of a SQL*Plus result.
    ///
    /// Blank lines are dropped. When a dash separator is present, the header
    /// above it and the separator itself are skipped. "no rows selected"
    /// yields nothing.
    pub fn rows(&self) -> Vec<&str> {
        let lines: Vec<&str> = self
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let start = lines
            .iter()
            .position(|l| l.chars().all(|c| c == '-' || c == ' '))
            .map(|i| i + 1)
            .unwrap_or(0);

        lines[start..]
            .iter()
            .copied()
            .filter(|l| !l.eq_ignore_ascii_case("no rows selected"))
            .filter(|l| !l.ends_with("rows selected.") && !l.ends_with("row selected."))
            .collect()
    }

    /// Role from `SELECT DATABASE_ROLE FROM V$DATABASE`
    pub fn database_role(&self) -> Option<DatabaseRole> {
        if !self.ora_codes().is_empty() {
            return None;
        }
        self.rows().first().and_then(|r| r.parse().ok())
    }

    /// `SID:ROLE` rows from the broker configuration view
    pub fn broker_members(&self) -> Vec<(String, DatabaseRole)> {
        self.rows()
            .into_iter()
            .filter_map(|row| {
                let (sid, role) = row.split_once(':')?;
                let sid = sid.trim();
                if sid.is_empty() {
                    return None;
                }
                Some((sid.to_ascii_uppercase(), role.parse().ok()?))
            })
            .collect()
    }

    /// `SHOW USER` printed `USER is "SYS"`
    pub fn is_sys_user(&self) -> bool {
        self.stdout.contains("USER is \"SYS\"")
    }

    /// Output of a `true`/`false` probe
    pub fn is_true(&self) -> bool {
        self.stdout.trim() == "true"
    }

    /// `name:value` flag rows
    pub fn log_flags(&self) -> Option<LogFlags> {
        let mut flags = LogFlags::default();
        let mut seen = 0;
        for row in self.rows() {
            let Some((name, value)) = row.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match name.trim() {
                "log_mode" => flags.archive_log = value == "ARCHIVELOG",
                "flashback_on" => flags.flashback = value == "YES",
                "force_logging" => flags.force_logging = value == "YES",
                _ => continue,
            }
            seen += 1;
        }
        (seen == 3).then_some(flags)
    }
}

fn codes_in_line(line: &str) -> Vec<OraCode> {
    let mut codes = Vec::new();
    let mut rest = line;
    while let Some(idx) = rest.find("ORA-") {
        let after = &rest[idx + 4..];
        let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.len() == 5 {
            if let Ok(n) = digits.parse() {
                codes.push(OraCode(n));
            }
        }
        rest = after;
    }
    codes
}
